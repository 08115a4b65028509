//! RGB pixels, palettes and 8-bit color math.
//!
//! The render path works in 8-bit-per-channel RGB with the usual
//! fixed-point helpers. User-editable colors travel as `#RRGGBB` strings
//! in JSON; palettes as arrays of them.

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Scale an 8-bit value by a factor (0-255 = 0.0-1.0).
#[inline]
pub const fn scale8(value: u8, scale: u8) -> u8 {
    ((value as u16 * (1 + scale as u16)) >> 8) as u8
}

/// Video-safe variant: any non-zero input scaled by a non-zero factor
/// stays non-zero, so dim pixels never blink fully off.
#[inline]
pub const fn scale8_video(value: u8, scale: u8) -> u8 {
    if value == 0 || scale == 0 {
        if value != 0 && scale != 0 {
            1
        } else {
            0
        }
    } else {
        let scaled = ((value as u16 * scale as u16) >> 8) as u8;
        if scaled == 0 {
            1
        } else {
            scaled
        }
    }
}

/// Blend two 8-bit values by `amount_of_b`.
#[inline]
pub const fn blend8(a: u8, b: u8, amount_of_b: u8) -> u8 {
    let delta = b as i16 - a as i16;
    let mut partial: u32 = (a as u32) << 16;
    partial = partial.wrapping_add(
        (delta as u32)
            .wrapping_mul(amount_of_b as u32)
            .wrapping_mul(257),
    );
    partial = partial.wrapping_add(0x8000);
    (partial >> 16) as u8
}

/// Saturating 8-bit add.
#[inline]
pub const fn qadd8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}

/// Saturating 8-bit subtract.
#[inline]
pub const fn qsub8(a: u8, b: u8) -> u8 {
    a.saturating_sub(b)
}

/// One 8-bit-per-channel RGB pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale all channels, video-safe.
    pub fn scaled_video(self, scale: u8) -> Self {
        Rgb::new(
            scale8_video(self.r, scale),
            scale8_video(self.g, scale),
            scale8_video(self.b, scale),
        )
    }

    /// Scale all channels.
    pub fn scaled(self, scale: u8) -> Self {
        Rgb::new(
            scale8(self.r, scale),
            scale8(self.g, scale),
            scale8(self.b, scale),
        )
    }

    /// Blend toward `other` by `amount` (0 = self, 255 = other).
    pub fn blend(self, other: Rgb, amount: u8) -> Self {
        Rgb::new(
            blend8(self.r, other.r, amount),
            blend8(self.g, other.g, amount),
            blend8(self.b, other.b, amount),
        )
    }

    /// Parse `#RRGGBB` (leading `#` optional).
    pub fn from_hex(text: &str) -> Option<Self> {
        let hex = text.strip_prefix('#').unwrap_or(text);
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Rgb::new(r, g, b))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl Add for Rgb {
    type Output = Rgb;

    fn add(self, rhs: Rgb) -> Rgb {
        Rgb::new(
            qadd8(self.r, rhs.r),
            qadd8(self.g, rhs.g),
            qadd8(self.b, rhs.b),
        )
    }
}

impl AddAssign for Rgb {
    fn add_assign(&mut self, rhs: Rgb) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Rgb::from_hex(&text).ok_or_else(|| D::Error::custom(format!("invalid color '{}'", text)))
    }
}

/// Fixed 16-entry palette sampled with interpolation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette16(pub [Rgb; 16]);

impl Palette16 {
    pub const fn solid(color: Rgb) -> Self {
        Palette16([color; 16])
    }

    /// Sample at an 8-bit index, blending between adjacent entries.
    /// The top 4 bits select the entry, the bottom 4 the blend toward
    /// the next (wrapping).
    pub fn sample(&self, index: u8) -> Rgb {
        let slot = (index >> 4) as usize;
        let frac = (index & 0x0f) << 4;
        let a = self.0[slot];
        let b = self.0[(slot + 1) % 16];
        a.blend(b, frac)
    }
}

/// Fill a slice with a linear gradient between two colors, inclusive.
pub fn fill_gradient(buf: &mut [Rgb], from: Rgb, to: Rgb) {
    let len = buf.len();
    if len == 0 {
        return;
    }
    if len == 1 {
        buf[0] = from;
        return;
    }
    for (i, pixel) in buf.iter_mut().enumerate() {
        let amount = (i * 255 / (len - 1)) as u8;
        *pixel = from.blend(to, amount);
    }
}

/// User-editable palette: an ordered list of color stops.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicPalette {
    pub colors: Vec<Rgb>,
}

impl DynamicPalette {
    pub fn from_colors(colors: Vec<Rgb>) -> Self {
        Self { colors }
    }

    /// Sample at a normalized position, interpolating between stops.
    pub fn sample(&self, pos: f32) -> Rgb {
        match self.colors.len() {
            0 => Rgb::BLACK,
            1 => self.colors[0],
            n => {
                let pos = pos.clamp(0.0, 1.0);
                let scaled = pos * (n - 1) as f32;
                let idx = (scaled as usize).min(n - 2);
                let frac = scaled - idx as f32;
                self.colors[idx].blend(self.colors[idx + 1], (frac * 255.0) as u8)
            }
        }
    }

    /// Expand the stops into a 16-entry palette by segment-wise
    /// gradient fill.
    pub fn to_palette16(&self) -> Palette16 {
        let mut pal = Palette16::solid(Rgb::BLACK);
        match self.colors.len() {
            0 => {}
            1 => pal = Palette16::solid(self.colors[0]),
            n => {
                let segments = n - 1;
                let segment_len = 15.0 / segments as f32;
                for i in 0..segments {
                    let start = (i as f32 * segment_len) as usize;
                    let end = if i == segments - 1 {
                        15
                    } else {
                        ((i + 1) as f32 * segment_len) as usize
                    };
                    fill_gradient(&mut pal.0[start..=end], self.colors[i], self.colors[i + 1]);
                }
            }
        }
        pal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale8() {
        assert_eq!(scale8(255, 255), 255);
        assert_eq!(scale8(255, 0), 0);
        assert_eq!(scale8(128, 128), 64);
    }

    #[test]
    fn test_scale8_video_keeps_dim_pixels_lit() {
        assert_eq!(scale8_video(1, 1), 1);
        assert_eq!(scale8_video(0, 200), 0);
        assert_eq!(scale8_video(200, 0), 0);
        assert_eq!(scale8_video(255, 255), 255);
    }

    #[test]
    fn test_blend8_endpoints() {
        assert_eq!(blend8(10, 200, 0), 10);
        assert_eq!(blend8(10, 200, 255), 200);
    }

    #[test]
    fn test_saturating_math() {
        assert_eq!(qadd8(200, 100), 255);
        assert_eq!(qsub8(50, 100), 0);
    }

    #[test]
    fn test_rgb_hex_round_trip() {
        let c = Rgb::new(0x12, 0xab, 0xef);
        assert_eq!(c.to_hex(), "#12ABEF");
        assert_eq!(Rgb::from_hex("#12ABEF"), Some(c));
        assert_eq!(Rgb::from_hex("12abef"), Some(c));
        assert_eq!(Rgb::from_hex("#12345"), None);
        assert_eq!(Rgb::from_hex("zzzzzz"), None);
    }

    #[test]
    fn test_rgb_serde() {
        let c = Rgb::new(255, 30, 0);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"#FF1E00\"");
        let back: Rgb = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_rgb_saturating_add() {
        let a = Rgb::new(200, 10, 0);
        let b = Rgb::new(100, 10, 5);
        assert_eq!(a + b, Rgb::new(255, 20, 5));
    }

    #[test]
    fn test_fill_gradient() {
        let mut buf = [Rgb::BLACK; 3];
        fill_gradient(&mut buf, Rgb::BLACK, Rgb::WHITE);
        assert_eq!(buf[0], Rgb::BLACK);
        assert_eq!(buf[2], Rgb::WHITE);
        assert!(buf[1].r > 0 && buf[1].r < 255);
    }

    #[test]
    fn test_dynamic_palette_sample() {
        let pal = DynamicPalette::from_colors(vec![Rgb::BLACK, Rgb::WHITE]);
        assert_eq!(pal.sample(0.0), Rgb::BLACK);
        assert_eq!(pal.sample(1.0), Rgb::WHITE);
        let mid = pal.sample(0.5);
        assert!(mid.r > 100 && mid.r < 160);

        assert_eq!(DynamicPalette::default().sample(0.5), Rgb::BLACK);
        let solid = DynamicPalette::from_colors(vec![Rgb::new(1, 2, 3)]);
        assert_eq!(solid.sample(0.9), Rgb::new(1, 2, 3));
    }

    #[test]
    fn test_to_palette16() {
        let pal = DynamicPalette::from_colors(vec![Rgb::BLACK, Rgb::WHITE]).to_palette16();
        assert_eq!(pal.0[0], Rgb::BLACK);
        assert_eq!(pal.0[15], Rgb::WHITE);

        let empty = DynamicPalette::default().to_palette16();
        assert_eq!(empty.0[7], Rgb::BLACK);

        let solid = DynamicPalette::from_colors(vec![Rgb::new(9, 9, 9)]).to_palette16();
        assert_eq!(solid.0[0], Rgb::new(9, 9, 9));
        assert_eq!(solid.0[15], Rgb::new(9, 9, 9));
    }

    #[test]
    fn test_palette16_sample_interpolates() {
        let pal = DynamicPalette::from_colors(vec![Rgb::BLACK, Rgb::WHITE]).to_palette16();
        assert_eq!(pal.sample(0), Rgb::BLACK);
        let low = pal.sample(32);
        let high = pal.sample(224);
        assert!(low.r < high.r);
    }
}
