//! Layer blend modes in 15-bit fixed point.
//!
//! Each mode is a pure function `(src_rgb, dst_rgb, alpha) -> (rgb,
//! alpha_done)`.  `alpha_done == true` means the mode folded source alpha
//! into its own math (the luminous Additive/Subtract pair); the caller
//! must then skip the separate linear alpha blend.  The distinction
//! changes rounding at alpha = max and is part of the wire contract, so
//! it is pinned by tests.
//!
//! Closed set — no runtime registration.  Dispatch is a single `match`,
//! so per-pixel calls monomorphize without indirect-call overhead.

use serde::{Deserialize, Serialize};

const ONE: i32 = 0x8000;
const HALF: i32 = 0x4000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    HardLight,
    SoftLight,
    Dodge,
    Burn,
    LinearBurn,
    VividLight,
    LinearLight,
    PinLight,
    HardMix,
    Darken,
    Lighten,
    Difference,
    /// Luminous add — folds alpha into its own math.
    Additive,
    /// Luminous subtract — folds alpha into its own math.
    Subtract,
    Divide,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Dodge,
            BlendMode::Burn,
            BlendMode::LinearBurn,
            BlendMode::VividLight,
            BlendMode::LinearLight,
            BlendMode::PinLight,
            BlendMode::HardMix,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::Difference,
            BlendMode::Additive,
            BlendMode::Subtract,
            BlendMode::Divide,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Dodge => "Dodge",
            BlendMode::Burn => "Burn",
            BlendMode::LinearBurn => "Linear Burn",
            BlendMode::VividLight => "Vivid Light",
            BlendMode::LinearLight => "Linear Light",
            BlendMode::PinLight => "Pin Light",
            BlendMode::HardMix => "Hard Mix",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::Difference => "Difference",
            BlendMode::Additive => "Additive",
            BlendMode::Subtract => "Subtract",
            BlendMode::Divide => "Divide",
        }
    }

    /// Convert to a stable u8 for binary serialization
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Overlay => 3,
            BlendMode::HardLight => 4,
            BlendMode::SoftLight => 5,
            BlendMode::Dodge => 6,
            BlendMode::Burn => 7,
            BlendMode::LinearBurn => 8,
            BlendMode::VividLight => 9,
            BlendMode::LinearLight => 10,
            BlendMode::PinLight => 11,
            BlendMode::HardMix => 12,
            BlendMode::Darken => 13,
            BlendMode::Lighten => 14,
            BlendMode::Difference => 15,
            BlendMode::Additive => 16,
            BlendMode::Subtract => 17,
            BlendMode::Divide => 18,
        }
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values)
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Overlay,
            4 => BlendMode::HardLight,
            5 => BlendMode::SoftLight,
            6 => BlendMode::Dodge,
            7 => BlendMode::Burn,
            8 => BlendMode::LinearBurn,
            9 => BlendMode::VividLight,
            10 => BlendMode::LinearLight,
            11 => BlendMode::PinLight,
            12 => BlendMode::HardMix,
            13 => BlendMode::Darken,
            14 => BlendMode::Lighten,
            15 => BlendMode::Difference,
            16 => BlendMode::Additive,
            17 => BlendMode::Subtract,
            18 => BlendMode::Divide,
            _ => BlendMode::Normal,
        }
    }

    /// Whether this mode folds source alpha into its own math.
    pub fn folds_alpha(&self) -> bool {
        matches!(self, BlendMode::Additive | BlendMode::Subtract)
    }

    /// Blend one pixel.  `src`/`dst` channels and `alpha` are 15-bit fixed
    /// point.  Returns the blended RGB and whether alpha was already
    /// applied by the mode itself.
    #[inline]
    pub fn apply(self, src: [i32; 3], dst: [i32; 3], alpha: i32) -> ([i32; 3], bool) {
        match self {
            BlendMode::Normal => (src, false),
            BlendMode::Multiply => (per_channel(src, dst, multiply_channel), false),
            BlendMode::Screen => (per_channel(src, dst, screen_channel), false),
            BlendMode::Overlay => (per_channel(src, dst, |s, d| overlay_channel(s, d)), false),
            BlendMode::HardLight => (per_channel(src, dst, |s, d| overlay_channel(d, s)), false),
            BlendMode::SoftLight => (per_channel(src, dst, soft_light_channel), false),
            BlendMode::Dodge => (per_channel(src, dst, dodge_channel), false),
            BlendMode::Burn => (per_channel(src, dst, burn_channel), false),
            BlendMode::LinearBurn => (per_channel(src, dst, |s, d| (d + s - ONE).max(0)), false),
            BlendMode::VividLight => (per_channel(src, dst, vivid_light_channel), false),
            BlendMode::LinearLight => {
                (per_channel(src, dst, |s, d| (d + 2 * s - ONE).clamp(0, ONE)), false)
            }
            BlendMode::PinLight => (per_channel(src, dst, pin_light_channel), false),
            BlendMode::HardMix => {
                (per_channel(src, dst, |s, d| if s + d >= ONE { ONE } else { 0 }), false)
            }
            BlendMode::Darken => (per_channel(src, dst, |s, d| s.min(d)), false),
            BlendMode::Lighten => (per_channel(src, dst, |s, d| s.max(d)), false),
            BlendMode::Difference => (per_channel(src, dst, |s, d| (s - d).abs()), false),
            BlendMode::Additive => {
                (per_channel(src, dst, |s, d| (d + ((s * alpha) >> 15)).min(ONE)), true)
            }
            BlendMode::Subtract => {
                (per_channel(src, dst, |s, d| (d - ((s * alpha) >> 15)).max(0)), true)
            }
            BlendMode::Divide => (per_channel(src, dst, divide_channel), false),
        }
    }
}

#[inline]
fn per_channel(src: [i32; 3], dst: [i32; 3], f: impl Fn(i32, i32) -> i32) -> [i32; 3] {
    [f(src[0], dst[0]), f(src[1], dst[1]), f(src[2], dst[2])]
}

#[inline]
fn multiply_channel(s: i32, d: i32) -> i32 {
    (s * d) >> 15
}

#[inline]
fn screen_channel(s: i32, d: i32) -> i32 {
    s + d - ((s * d) >> 15)
}

/// `base` below the midpoint multiplies, above it screens.
#[inline]
fn overlay_channel(top: i32, base: i32) -> i32 {
    if base < HALF {
        (top * base) >> 14
    } else {
        ONE - (((ONE - top) * (ONE - base)) >> 14)
    }
}

#[inline]
fn dodge_channel(s: i32, d: i32) -> i32 {
    if s >= ONE {
        ONE
    } else {
        (d * ONE / (ONE - s)).min(ONE)
    }
}

#[inline]
fn burn_channel(s: i32, d: i32) -> i32 {
    if s <= 0 {
        0
    } else {
        (ONE - (ONE - d) * ONE / s).max(0)
    }
}

fn vivid_light_channel(s: i32, d: i32) -> i32 {
    if s < HALF {
        burn_channel(2 * s, d)
    } else {
        dodge_channel(2 * (s - HALF), d)
    }
}

#[inline]
fn pin_light_channel(s: i32, d: i32) -> i32 {
    if s >= HALF {
        d.max(2 * (s - HALF))
    } else {
        d.min(2 * s)
    }
}

#[inline]
fn divide_channel(s: i32, d: i32) -> i32 {
    if s <= 0 {
        ONE
    } else {
        (d * ONE / s).min(ONE)
    }
}

/// W3C Soft Light formula, fixed point.
fn soft_light_channel(s: i32, d: i32) -> i32 {
    if s <= HALF {
        d - ((((ONE - 2 * s) * d >> 15) * (ONE - d)) >> 15)
    } else {
        let root = if d <= ONE / 4 {
            let t = (((16 * d - 12 * ONE) as i64 * d as i64) >> 15) as i32 + 4 * ONE;
            ((t as i64 * d as i64) >> 15) as i32
        } else {
            fix15_sqrt(d)
        };
        d + (((2 * s - ONE) * (root - d)) >> 15)
    }
}

/// Integer sqrt in 15-bit fixed point: `sqrt(v / ONE) * ONE`.
fn fix15_sqrt(v: i32) -> i32 {
    // sqrt(v << 15) over integers, bit-by-bit.
    let target = (v as u64) << 15;
    let mut root: u64 = 0;
    let mut bit: u64 = 1 << 15;
    while bit > 0 {
        let cand = root | bit;
        if cand * cand <= target {
            root = cand;
        }
        bit >>= 1;
    }
    root as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [i32; 3] = [ONE, ONE, ONE];
    const BLACK: [i32; 3] = [0, 0, 0];
    const GRAY: [i32; 3] = [HALF, HALF, HALF];

    #[test]
    fn stable_tags_round_trip() {
        for &mode in BlendMode::all() {
            assert_eq!(BlendMode::from_u8(mode.to_u8()), mode);
        }
        assert_eq!(BlendMode::all().len(), 19);
    }

    #[test]
    fn only_the_luminous_pair_folds_alpha() {
        for &mode in BlendMode::all() {
            let (_, done) = mode.apply(GRAY, GRAY, ONE);
            assert_eq!(done, mode.folds_alpha(), "{}", mode.name());
            assert_eq!(
                mode.folds_alpha(),
                matches!(mode, BlendMode::Additive | BlendMode::Subtract),
                "{}",
                mode.name()
            );
        }
    }

    #[test]
    fn multiply_endpoints() {
        assert_eq!(BlendMode::Multiply.apply(WHITE, GRAY, ONE).0, GRAY);
        assert_eq!(BlendMode::Multiply.apply(BLACK, WHITE, ONE).0, BLACK);
    }

    #[test]
    fn screen_endpoints() {
        assert_eq!(BlendMode::Screen.apply(WHITE, GRAY, ONE).0, WHITE);
        assert_eq!(BlendMode::Screen.apply(BLACK, GRAY, ONE).0, GRAY);
    }

    #[test]
    fn overlay_branches_on_dst_hard_light_on_src() {
        // White over a dark base: Overlay multiplies (dark base wins the
        // branch), Hard Light screens (white source wins the branch).
        let dark = [0x1000; 3];
        let (overlay, _) = BlendMode::Overlay.apply(WHITE, dark, ONE);
        assert_eq!(overlay, [0x2000; 3]);
        let (hard, _) = BlendMode::HardLight.apply(WHITE, dark, ONE);
        assert_eq!(hard, WHITE);
    }

    #[test]
    fn every_mode_stays_in_range() {
        let samples = [0, 1, HALF - 1, HALF, HALF + 1, ONE - 1, ONE];
        for &mode in BlendMode::all() {
            for &s in &samples {
                for &d in &samples {
                    for &a in &[0, HALF, ONE] {
                        let (rgb, _) = mode.apply([s; 3], [d; 3], a);
                        for c in rgb {
                            assert!(
                                (0..=ONE).contains(&c),
                                "{} out of range: s={s} d={d} a={a} -> {c}",
                                mode.name()
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn additive_folds_alpha_into_its_math() {
        let (rgb, done) = BlendMode::Additive.apply(GRAY, GRAY, HALF);
        assert!(done);
        assert_eq!(rgb, [HALF + HALF / 2; 3]);
    }

    #[test]
    fn subtract_clamps_at_black() {
        let (rgb, done) = BlendMode::Subtract.apply(WHITE, GRAY, ONE);
        assert!(done);
        assert_eq!(rgb, BLACK);
    }

    #[test]
    fn sqrt_fixed_point_reference_points() {
        assert_eq!(fix15_sqrt(0), 0);
        assert_eq!(fix15_sqrt(ONE), ONE);
        // sqrt(0.25) = 0.5
        assert_eq!(fix15_sqrt(ONE / 4), HALF);
    }
}
