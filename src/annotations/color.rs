use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// RGBA color carried by annotation primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parses `#RRGGBB`, `#AARRGGBB` or a color name such as `red` or `lightgray`
    pub fn parse(value: &str) -> Option<Color> {
        let value = value.trim();
        if let Some(hex) = value.strip_prefix('#') {
            return parse_hex(hex);
        }
        named(&value.to_ascii_lowercase())
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Color::parse(s).ok_or_else(|| format!("unknown color '{}'", s))
    }
}

fn parse_hex(hex: &str) -> Option<Color> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let value = u32::from_str_radix(hex, 16).ok()?;
    match hex.len() {
        6 => Some(Color::rgb(
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        )),
        // Alpha comes first
        8 => Some(Color::new(
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
            (value >> 24) as u8,
        )),
        _ => None,
    }
}

fn named(name: &str) -> Option<Color> {
    let color = match name {
        "black" => Color::rgb(0x00, 0x00, 0x00),
        "darkgray" | "darkgrey" => Color::rgb(0x44, 0x44, 0x44),
        "gray" | "grey" => Color::rgb(0x88, 0x88, 0x88),
        "lightgray" | "lightgrey" => Color::rgb(0xCC, 0xCC, 0xCC),
        "white" => Color::rgb(0xFF, 0xFF, 0xFF),
        "red" => Color::rgb(0xFF, 0x00, 0x00),
        "green" => Color::rgb(0x00, 0xFF, 0x00),
        "blue" => Color::rgb(0x00, 0x00, 0xFF),
        "yellow" => Color::rgb(0xFF, 0xFF, 0x00),
        "cyan" | "aqua" => Color::rgb(0x00, 0xFF, 0xFF),
        "magenta" | "fuchsia" => Color::rgb(0xFF, 0x00, 0xFF),
        "lime" => Color::rgb(0x00, 0xFF, 0x00),
        "maroon" => Color::rgb(0x80, 0x00, 0x00),
        "navy" => Color::rgb(0x00, 0x00, 0x80),
        "olive" => Color::rgb(0x80, 0x80, 0x00),
        "purple" => Color::rgb(0x80, 0x00, 0x80),
        "silver" => Color::rgb(0xC0, 0xC0, 0xC0),
        "teal" => Color::rgb(0x00, 0x80, 0x80),
        _ => return None,
    };
    Some(color)
}
