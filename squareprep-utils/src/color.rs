//! Basic color utilities shared by the pad-color policy and the CLI.

use image::Rgba;
use serde::{Deserialize, Serialize};

/// Simple RGBA color stored in 8-bit channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RgbaColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl RgbaColor {
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self {
        red: 0,
        green: 0,
        blue: 0,
        alpha: 0,
    };

    /// Constructs an opaque RGB color.
    pub const fn opaque(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha: 255,
        }
    }

    /// Convert into an `image` pixel.
    pub const fn to_pixel(self) -> Rgba<u8> {
        Rgba([self.red, self.green, self.blue, self.alpha])
    }

    /// Render as `#RRGGBBAA`.
    pub fn to_hex(self) -> String {
        format!(
            "#{:02X}{:02X}{:02X}{:02X}",
            self.red, self.green, self.blue, self.alpha
        )
    }
}

impl Default for RgbaColor {
    fn default() -> Self {
        Self::opaque(0, 0, 0)
    }
}

/// Parse a hexadecimal color string. Accepts `#RGB`, `#RRGGBB`, `#RRGGBBAA`, with or without `#`.
pub fn parse_hex_color(input: &str) -> Option<RgbaColor> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut hex = trimmed;
    if let Some(stripped) = hex.strip_prefix('#') {
        hex = stripped;
    } else if let Some(stripped) = hex.strip_prefix("0x") {
        hex = stripped;
    }
    let hex = hex.replace('_', "");
    match hex.len() {
        3 => Some(RgbaColor::opaque(
            replicate_nibble(hex.get(0..1)?)?,
            replicate_nibble(hex.get(1..2)?)?,
            replicate_nibble(hex.get(2..3)?)?,
        )),
        6 => Some(RgbaColor::opaque(
            parse_byte(hex.get(0..2)?)?,
            parse_byte(hex.get(2..4)?)?,
            parse_byte(hex.get(4..6)?)?,
        )),
        8 => Some(RgbaColor {
            red: parse_byte(hex.get(0..2)?)?,
            green: parse_byte(hex.get(2..4)?)?,
            blue: parse_byte(hex.get(4..6)?)?,
            alpha: parse_byte(hex.get(6..8)?)?,
        }),
        _ => None,
    }
}

fn parse_byte(slice: &str) -> Option<u8> {
    u8::from_str_radix(slice, 16).ok()
}

fn replicate_nibble(slice: &str) -> Option<u8> {
    let nib = u8::from_str_radix(slice, 16).ok()?;
    Some((nib << 4) | nib)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_long_and_alpha_forms() {
        assert_eq!(parse_hex_color("#fff"), Some(RgbaColor::opaque(255, 255, 255)));
        assert_eq!(parse_hex_color("102030"), Some(RgbaColor::opaque(16, 32, 48)));
        assert_eq!(
            parse_hex_color("0x10203040"),
            Some(RgbaColor {
                red: 16,
                green: 32,
                blue: 48,
                alpha: 64
            })
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_hex_color(""), None);
        assert_eq!(parse_hex_color("#12"), None);
        assert_eq!(parse_hex_color("#gggggg"), None);
    }

    #[test]
    fn hex_rendering_round_trips() {
        let color = RgbaColor {
            red: 1,
            green: 2,
            blue: 254,
            alpha: 128,
        };
        assert_eq!(color.to_hex(), "#0102FE80");
        assert_eq!(parse_hex_color(&color.to_hex()), Some(color));
    }
}
