use serde::{Deserialize, Serialize};

use crate::error::{Error, TmResult};

/// RGBA color with 8-bit components
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

fn parse_hex_component(hex: &str, original: &str) -> TmResult<u8> {
    u8::from_str_radix(hex, 16).map_err(|_| Error::InvalidHexColor {
        value: original.to_string(),
        reason: format!("invalid hex component '{}'", hex),
    })
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    /// An opaque color from its components, the form CSS-like theme sheets resolve to.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Color {
        Color { r, g, b, a: 255 }
    }

    /// Outputs the hex value for that colour.
    #[inline]
    pub fn as_hex(&self) -> String {
        if self.a < 255 {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        } else {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        }
    }

    /// Creates a Color from a string (in theory a hex but it can also be black/white).
    ///
    /// Errors if the string is not a valid hex colour.
    pub fn from_hex(hex: &str) -> TmResult<Self> {
        let original = hex;
        let hex = hex.trim().trim_start_matches('#');

        if hex.eq_ignore_ascii_case("white") {
            return Ok(Color::WHITE);
        } else if hex.eq_ignore_ascii_case("black") {
            return Ok(Color::BLACK);
        }
        if !hex.is_ascii() {
            return Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: "non-ascii characters".to_string(),
            });
        }

        let short = |i: usize| -> TmResult<u8> {
            Ok(parse_hex_component(&hex[i..i + 1], original)? * 17)
        };
        let long = |i: usize| parse_hex_component(&hex[i..i + 2], original);

        match hex.len() {
            // #RGB
            3 => Ok(Color::rgb(short(0)?, short(1)?, short(2)?)),
            // #RGBA
            4 => Ok(Color {
                a: short(3)?,
                ..Color::rgb(short(0)?, short(1)?, short(2)?)
            }),
            // #RRGGBB
            6 => Ok(Color::rgb(long(0)?, long(2)?, long(4)?)),
            // #RRGGBBAA
            8 => Ok(Color {
                a: long(6)?,
                ..Color::rgb(long(0)?, long(2)?, long(4)?)
            }),
            _ => Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: format!("invalid length {}", hex.len()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_hex_colors() {
        let inputs = vec![
            ("#F00", Color::rgb(255, 0, 0)),
            ("#0F0", Color::rgb(0, 255, 0)),
            (
                "#0008",
                Color {
                    r: 0,
                    g: 0,
                    b: 0,
                    a: 136,
                },
            ),
            ("#808080", Color::rgb(128, 128, 128)),
            ("ff8000", Color::rgb(255, 128, 0)),
            (
                "#FF000080",
                Color {
                    r: 255,
                    g: 0,
                    b: 0,
                    a: 128,
                },
            ),
            ("white", Color::WHITE),
            ("#black", Color::BLACK),
        ];

        for (input, expected) in inputs {
            assert_eq!(Color::from_hex(input).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn rejects_invalid_hex_colors() {
        for input in ["#GG0000", "#12345", "", "#ÿÿÿ"] {
            assert!(Color::from_hex(input).is_err(), "{input}");
        }
    }

    #[test]
    fn can_output_hex() {
        assert_eq!(Color::rgb(255, 0, 16).as_hex(), "#FF0010");
        assert_eq!(
            Color {
                r: 0,
                g: 0,
                b: 0,
                a: 16
            }
            .as_hex(),
            "#00000010"
        );
    }
}
