//! Packed token metadata.
//!
//! Memory layout of the `u32`, least significant bits first:
//!
//! ```text
//! bbbb bbbb bfff ffff ffFF FFTT LLLL LLLL
//! L = language id (8 bits)
//! T = standard token type (2 bits)
//! F = font style flags (4 bits)
//! f = foreground color id (9 bits)
//! b = background color id (9 bits)
//! ```
//!
//! Color id 0 means "not set", the theme's default colors live at ids 1 and 2.

use std::fmt;

use serde::Serialize;

use crate::themes::FontStyle;

const LANGUAGE_ID_OFFSET: u32 = 0;
const TOKEN_TYPE_OFFSET: u32 = 8;
const FONT_STYLE_OFFSET: u32 = 10;
const FOREGROUND_OFFSET: u32 = 14;
const BACKGROUND_OFFSET: u32 = 23;

const LANGUAGE_ID_MASK: u32 = 0xFF << LANGUAGE_ID_OFFSET;
const TOKEN_TYPE_MASK: u32 = 0b11 << TOKEN_TYPE_OFFSET;
const FONT_STYLE_MASK: u32 = 0b1111 << FONT_STYLE_OFFSET;
const FOREGROUND_MASK: u32 = 0x1FF << FOREGROUND_OFFSET;
const BACKGROUND_MASK: u32 = 0x1FF << BACKGROUND_OFFSET;

/// Biggest color id that fits in the foreground/background fields
pub const MAX_COLOR_ID: u16 = 0x1FF;

/// Token kinds editors care about for bracket matching, commenting etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[repr(u8)]
pub enum StandardTokenType {
    #[default]
    Other = 0,
    Comment = 1,
    String = 2,
    RegEx = 3,
}

impl StandardTokenType {
    fn from_bits(bits: u32) -> Self {
        match bits {
            1 => StandardTokenType::Comment,
            2 => StandardTokenType::String,
            3 => StandardTokenType::RegEx,
            _ => StandardTokenType::Other,
        }
    }

    /// Finds the token type a scope name implies, if any.
    ///
    /// Looks for the first `comment`, `string`, `regex` or `meta.embedded` atom sequence,
    /// the same way `\b(comment|string|regex|meta\.embedded)\b` would on the scope name.
    pub fn from_scope_name(scope: &str) -> Option<Self> {
        let mut atoms = scope.split('.').peekable();
        while let Some(atom) = atoms.next() {
            match atom {
                "comment" => return Some(StandardTokenType::Comment),
                "string" => return Some(StandardTokenType::String),
                "regex" => return Some(StandardTokenType::RegEx),
                "meta" if atoms.peek() == Some(&"embedded") => {
                    return Some(StandardTokenType::Other);
                }
                _ => (),
            }
        }
        None
    }
}

/// Style and language information for a scope path, packed in a single integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Metadata(u32);

impl Metadata {
    pub const fn from_bits(bits: u32) -> Self {
        Metadata(bits)
    }

    pub fn new(
        language_id: u8,
        token_type: StandardTokenType,
        font_style: FontStyle,
        foreground: u16,
        background: u16,
    ) -> Self {
        Metadata(0)
            .with_language_id(language_id)
            .with_token_type(token_type)
            .with_font_style(font_style)
            .with_foreground(foreground)
            .with_background(background)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn language_id(self) -> u8 {
        ((self.0 & LANGUAGE_ID_MASK) >> LANGUAGE_ID_OFFSET) as u8
    }

    #[inline]
    pub fn token_type(self) -> StandardTokenType {
        StandardTokenType::from_bits((self.0 & TOKEN_TYPE_MASK) >> TOKEN_TYPE_OFFSET)
    }

    #[inline]
    pub fn font_style(self) -> FontStyle {
        FontStyle::from_bits_truncate(((self.0 & FONT_STYLE_MASK) >> FONT_STYLE_OFFSET) as u8)
    }

    #[inline]
    pub fn foreground(self) -> u16 {
        ((self.0 & FOREGROUND_MASK) >> FOREGROUND_OFFSET) as u16
    }

    #[inline]
    pub fn background(self) -> u16 {
        ((self.0 & BACKGROUND_MASK) >> BACKGROUND_OFFSET) as u16
    }

    pub fn with_language_id(self, language_id: u8) -> Self {
        Metadata((self.0 & !LANGUAGE_ID_MASK) | ((language_id as u32) << LANGUAGE_ID_OFFSET))
    }

    pub fn with_token_type(self, token_type: StandardTokenType) -> Self {
        Metadata((self.0 & !TOKEN_TYPE_MASK) | ((token_type as u32) << TOKEN_TYPE_OFFSET))
    }

    pub fn with_font_style(self, font_style: FontStyle) -> Self {
        Metadata((self.0 & !FONT_STYLE_MASK) | ((font_style.bits() as u32) << FONT_STYLE_OFFSET))
    }

    /// Ids above [`MAX_COLOR_ID`] are truncated to the field width.
    pub fn with_foreground(self, color_id: u16) -> Self {
        let id = (color_id & MAX_COLOR_ID) as u32;
        Metadata((self.0 & !FOREGROUND_MASK) | (id << FOREGROUND_OFFSET))
    }

    pub fn with_background(self, color_id: u16) -> Self {
        let id = (color_id & MAX_COLOR_ID) as u32;
        Metadata((self.0 & !BACKGROUND_MASK) | (id << BACKGROUND_OFFSET))
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("language_id", &self.language_id())
            .field("token_type", &self.token_type())
            .field("font_style", &self.font_style().bits())
            .field("foreground", &self.foreground())
            .field("background", &self.background())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_independent() {
        let all_styles = FontStyle::from_theme_str("italic bold underline strikethrough");
        let m = Metadata::new(
            255,
            StandardTokenType::RegEx,
            all_styles,
            MAX_COLOR_ID,
            MAX_COLOR_ID,
        );
        assert_eq!(m.bits(), u32::MAX);
        assert_eq!(m.language_id(), 255);
        assert_eq!(m.token_type(), StandardTokenType::RegEx);
        assert_eq!(m.font_style(), all_styles);
        assert_eq!(m.foreground(), MAX_COLOR_ID);
        assert_eq!(m.background(), MAX_COLOR_ID);

        let m = m.with_foreground(300).with_font_style(FontStyle::BOLD);
        assert_eq!(m.foreground(), 300);
        assert_eq!(m.background(), MAX_COLOR_ID);
        assert_eq!(m.font_style(), FontStyle::BOLD);
        assert_eq!(m.language_id(), 255);
        assert_eq!(m.token_type(), StandardTokenType::RegEx);

        let m = Metadata::default().with_background(256).with_language_id(3);
        assert_eq!(m.background(), 256);
        assert_eq!(m.foreground(), 0);
        assert_eq!(m.language_id(), 3);
        assert_eq!(m.token_type(), StandardTokenType::Other);
    }

    #[test]
    fn token_type_from_scope_names() {
        let cases = [
            ("comment.line.double-slash.js", Some(StandardTokenType::Comment)),
            ("string.quoted.double", Some(StandardTokenType::String)),
            ("string.regexp.js", Some(StandardTokenType::String)),
            ("constant.regex", Some(StandardTokenType::RegEx)),
            ("meta.embedded.block.sql", Some(StandardTokenType::Other)),
            ("meta.function", None),
            ("keyword.commentary", None),
            ("source.js", None),
        ];

        for (scope, expected) in cases {
            assert_eq!(StandardTokenType::from_scope_name(scope), expected, "{scope}");
        }
    }
}
