//! Fixed-point pixel model shared by every color type.
//!
//! All channels are 15-bit fixed point: `0..=0x8000` where `0x8000` is
//! fully on.  The extra headroom bit keeps intermediate blend math inside
//! `i32` and guarantees exact round-trips through the undo journal — no
//! floating point anywhere in the pixel paths.

use bytemuck::{Pod, Zeroable};
use image::Rgba;
use serde::{Deserialize, Serialize};

/// Full intensity for a 15-bit fixed-point channel.
pub const FIX15_ONE: u16 = 0x8000;

/// Half intensity — the mask write threshold.
pub const FIX15_HALF: u16 = 0x4000;

/// Tiles are fixed 64×64-pixel blocks.
pub const TILE_SIZE: u32 = 64;

/// Pixels per tile.
pub const TILE_PIXELS: usize = (TILE_SIZE * TILE_SIZE) as usize;

/// The canonical pixel: 4×16-bit RGBA regardless of the underlying tile
/// storage.  Callers never branch on color type.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Pixel15 {
    pub r: u16,
    pub g: u16,
    pub b: u16,
    pub a: u16,
}

impl Pixel15 {
    pub const TRANSPARENT: Pixel15 = Pixel15 { r: 0, g: 0, b: 0, a: 0 };

    pub fn new(r: u16, g: u16, b: u16, a: u16) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque pixel from RGB channels.
    pub fn rgb(r: u16, g: u16, b: u16) -> Self {
        Self { r, g, b, a: FIX15_ONE }
    }

    #[inline]
    pub fn is_transparent(&self) -> bool {
        self.a == 0
    }

    /// Single-channel luma, the Tone storage channel.
    /// Weights sum to 256 so `0x8000` maps to `0x8000` exactly.
    #[inline]
    pub fn luma(&self) -> u16 {
        luma_from_rgb(self.r, self.g, self.b)
    }

    /// Convert from the 8-bit boundary representation.
    pub fn from_rgba8(px: Rgba<u8>) -> Self {
        Self {
            r: ch8_to_15(px[0]),
            g: ch8_to_15(px[1]),
            b: ch8_to_15(px[2]),
            a: ch8_to_15(px[3]),
        }
    }

    /// Convert to the 8-bit boundary representation.
    pub fn to_rgba8(&self) -> Rgba<u8> {
        Rgba([
            ch15_to_8(self.r),
            ch15_to_8(self.g),
            ch15_to_8(self.b),
            ch15_to_8(self.a),
        ])
    }
}

/// Rounded luma in fixed point: `(77R + 150G + 29B + 128) >> 8`.
#[inline]
pub fn luma_from_rgb(r: u16, g: u16, b: u16) -> u16 {
    ((r as u32 * 77 + g as u32 * 150 + b as u32 * 29 + 128) >> 8) as u16
}

/// 8-bit → 15-bit channel scaling, rounding half up.
#[inline]
pub fn ch8_to_15(v: u8) -> u16 {
    ((v as u32 * FIX15_ONE as u32 + 127) / 255) as u16
}

/// 15-bit → 8-bit channel scaling, rounding at the midpoint.
#[inline]
pub fn ch15_to_8(v: u16) -> u8 {
    ((v as u32 * 255 + FIX15_HALF as u32) >> 15) as u8
}

/// The four pixel storage layouts.  A closed set: all per-tile logic
/// dispatches through one `TileOps` record per variant, selected once at
/// store creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorType {
    /// 4×16-bit RGBA, 8 bytes per pixel.
    #[default]
    Full,
    /// 16-bit luma + 16-bit alpha, 4 bytes per pixel.
    Tone,
    /// 16-bit alpha only; RGB comes from the store's fallback color.
    Alpha,
    /// 1-bit alpha (on/off); RGB comes from the store's fallback color.
    Mask,
}

impl ColorType {
    pub fn all() -> &'static [ColorType] {
        &[ColorType::Full, ColorType::Tone, ColorType::Alpha, ColorType::Mask]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColorType::Full => "Full color",
            ColorType::Tone => "Tone",
            ColorType::Alpha => "Alpha",
            ColorType::Mask => "Mask",
        }
    }

    /// Bytes of one 64×64 tile in this layout.
    pub fn tile_bytes(&self) -> usize {
        match self {
            ColorType::Full => TILE_PIXELS * 8,
            ColorType::Tone => TILE_PIXELS * 4,
            ColorType::Alpha => TILE_PIXELS * 2,
            ColorType::Mask => TILE_PIXELS / 8,
        }
    }

    /// Whether this layout stores RGB per pixel at all.
    pub fn has_rgb(&self) -> bool {
        matches!(self, ColorType::Full | ColorType::Tone)
    }

    /// Stable tag for binary project files.
    pub fn to_u8(&self) -> u8 {
        match self {
            ColorType::Full => 0,
            ColorType::Tone => 1,
            ColorType::Alpha => 2,
            ColorType::Mask => 3,
        }
    }

    /// Reconstruct from a stable tag (defaults to Full for unknown values).
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ColorType::Tone,
            2 => ColorType::Alpha,
            3 => ColorType::Mask,
            _ => ColorType::Full,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_scaling_hits_endpoints() {
        assert_eq!(ch8_to_15(0), 0);
        assert_eq!(ch8_to_15(255), FIX15_ONE);
        assert_eq!(ch15_to_8(0), 0);
        assert_eq!(ch15_to_8(FIX15_ONE), 255);
    }

    #[test]
    fn channel_scaling_round_trips_8bit() {
        for v in 0..=255u8 {
            assert_eq!(ch15_to_8(ch8_to_15(v)), v);
        }
    }

    #[test]
    fn luma_weights_sum_to_full_scale() {
        assert_eq!(luma_from_rgb(FIX15_ONE, FIX15_ONE, FIX15_ONE), FIX15_ONE);
        assert_eq!(luma_from_rgb(0, 0, 0), 0);
    }

    #[test]
    fn tile_bytes_per_layout() {
        assert_eq!(ColorType::Full.tile_bytes(), 32768);
        assert_eq!(ColorType::Tone.tile_bytes(), 16384);
        assert_eq!(ColorType::Alpha.tile_bytes(), 8192);
        assert_eq!(ColorType::Mask.tile_bytes(), 512);
    }

    #[test]
    fn stable_tags_round_trip() {
        for &ct in ColorType::all() {
            assert_eq!(ColorType::from_u8(ct.to_u8()), ct);
        }
    }
}
