use serde::{Deserialize, Serialize};

/// Font style flags. The bit values are the ones stored in packed token metadata.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug,
)]
pub struct FontStyle {
    bits: u8,
}

impl FontStyle {
    /// Italic font style
    pub const ITALIC: Self = Self { bits: 1 };
    /// Bold font style
    pub const BOLD: Self = Self { bits: 2 };
    /// Underline font style
    pub const UNDERLINE: Self = Self { bits: 4 };
    /// Strikethrough font style
    pub const STRIKETHROUGH: Self = Self { bits: 8 };

    pub(crate) const MASK: u8 = 0b1111;

    /// Returns an empty set of flags
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self {
            bits: bits & Self::MASK,
        }
    }

    pub const fn bits(&self) -> u8 {
        self.bits
    }

    /// Returns `true` if no flags are currently stored
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Returns `true` if all of the flags in `other` are contained within `self`
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Returns the font style from a theme font style string such as `"bold italic"`.
    /// An empty string gives an empty style, which explicitly resets inherited flags.
    pub fn from_theme_str(font_style_str: &str) -> Self {
        let mut font_style = Self::empty();
        for part in font_style_str.split_whitespace() {
            match part {
                "bold" => font_style.insert(FontStyle::BOLD),
                "italic" => font_style.insert(FontStyle::ITALIC),
                "underline" => font_style.insert(FontStyle::UNDERLINE),
                "strikethrough" | "line-through" => font_style.insert(FontStyle::STRIKETHROUGH),
                _ => (),
            }
        }
        font_style
    }

    /// Inserts the specified flags in-place
    pub fn insert(&mut self, other: Self) {
        self.bits |= other.bits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_theme_font_styles() {
        let style = FontStyle::from_theme_str("bold  underline");
        assert!(style.contains(FontStyle::BOLD));
        assert!(style.contains(FontStyle::UNDERLINE));
        assert!(!style.contains(FontStyle::ITALIC));

        let all = FontStyle::from_theme_str("italic bold underline strikethrough");
        assert_eq!(all.bits(), 0b1111);

        assert!(FontStyle::from_theme_str("").is_empty());
        assert!(FontStyle::from_theme_str("normal").is_empty());
    }
}
