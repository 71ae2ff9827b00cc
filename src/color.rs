/// Linear RGBA color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl Color {
    /// Linear components in 0..1.
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color.
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);

    /// Builds an opaque color from a `0xRRGGBB` value.
    pub fn from_hex(hex: u32) -> Self {
        Self::rgb(
            ((hex >> 16) & 0xff) as f32 / 255.0,
            ((hex >> 8) & 0xff) as f32 / 255.0,
            (hex & 0xff) as f32 / 255.0,
        )
    }

    /// Parses `"RRGGBB"`, with or without a leading `#`.
    pub fn from_hex_str(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 {
            return None;
        }
        u32::from_str_radix(digits, 16).ok().map(Self::from_hex)
    }

    /// Packs the RGB channels into `0xRRGGBB`. Alpha is dropped.
    pub fn to_hex(&self) -> u32 {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
        (channel(self.r) << 16) | (channel(self.g) << 8) | channel(self.b)
    }

    /// `[r, g, b, a]`, the layout uploaded to shaders.
    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl From<Color> for wgpu::Color {
    fn from(color: Color) -> Self {
        wgpu::Color {
            r: color.r as f64,
            g: color.g as f64,
            b: color.b as f64,
            a: color.a as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let color = Color::from_hex(0x3366cc);
        assert_eq!(color.to_hex(), 0x3366cc);
        assert_eq!(color.a, 1.0);
    }

    #[test]
    fn hex_string_parsing() {
        assert_eq!(Color::from_hex_str("#ff0000"), Some(Color::RED));
        assert_eq!(Color::from_hex_str("00ff00"), Some(Color::GREEN));
        assert_eq!(Color::from_hex_str("fff"), None);
        assert_eq!(Color::from_hex_str("zzzzzz"), None);
    }

    #[test]
    fn to_hex_clamps_out_of_range_channels() {
        assert_eq!(Color::rgb(2.0, -1.0, 1.0).to_hex(), 0xff00ff);
    }
}
