//! Per-color-type tile operations behind one dispatch record.
//!
//! All higher-level tile logic is written once against [`TileOps`] instead
//! of once per storage layout.  One record of function values exists per
//! [`ColorType`] in a `static` table; the store selects its record once at
//! creation and caches the reference.  Per-pixel inner loops (compositing,
//! canonical conversion) monomorphize through generics inside this module,
//! so the record's indirect calls sit at tile granularity, not pixel
//! granularity.
//!
//! Codec operations never allocate and never fail; allocation lives one
//! level up, in the tile store.
//!
//! Tile storage is `[u16]` words:
//! - `Full`: interleaved R,G,B,A — 4 words per pixel;
//! - `Tone`: interleaved luma,A — 2 words per pixel;
//! - `Alpha`: one alpha word per pixel;
//! - `Mask`: one bit per pixel, 4 words per row, MSB-first.
//!
//! The serialized form is plane-separated big-endian (all of channel 0,
//! then channel 1, …), independent of host byte order; mask tiles
//! serialize as their raw 512 bits.  Flat color repeats per plane, not per
//! pixel, which is what the run-length diff codec feeds on.

use crate::composite::{blend_tile_with, TileBlend};
use crate::pixel::{ColorType, Pixel15, FIX15_HALF, FIX15_ONE, TILE_PIXELS, TILE_SIZE};

/// The per-color-type operation record.
pub struct TileOps {
    pub color_type: ColorType,
    /// `u16` words in one tile of this layout.
    pub tile_words: usize,
    /// Canonical-form read; `fallback` supplies RGB for the alpha-only
    /// layouts and is ignored by the others.
    pub get_pixel: fn(&[u16], u32, u32, [u16; 3]) -> Pixel15,
    /// Canonical-form write.
    pub set_pixel: fn(&mut [u16], u32, u32, &Pixel15),
    /// Equality under this layout's storage, for flood-fill boundary
    /// tests.  Fully transparent pixels compare equal regardless of stale
    /// RGB.
    pub same_color: fn(&Pixel15, &Pixel15) -> bool,
    /// Color equality ignoring alpha; always true where no RGB is stored.
    pub same_rgb: fn(&Pixel15, &Pixel15) -> bool,
    /// Whole-tile opacity scan, folding 32-bit words.
    pub is_transparent: fn(&[u16]) -> bool,
    pub to_canonical: fn(&[u16], [u16; 3], &mut [Pixel15]),
    pub from_canonical: fn(&mut [u16], &[Pixel15], bool),
    pub flip_h: fn(&mut [u16]),
    pub flip_v: fn(&mut [u16]),
    pub rotate_left: fn(&mut [u16]),
    pub rotate_right: fn(&mut [u16]),
    /// Append the plane-separated big-endian form.
    pub serialize: fn(&[u16], &mut Vec<u8>),
    /// Inverse of `serialize`; false on size mismatch.
    pub deserialize: fn(&mut [u16], &[u8]) -> bool,
    /// Composite (a sub-rectangle of) the tile into an accumulation band.
    pub blend_tile: for<'a> fn(&[u16], &mut TileBlend<'a>),
}

/// The dispatch record for a color type.
pub fn tile_ops(color_type: ColorType) -> &'static TileOps {
    &TILE_OPS[color_type.to_u8() as usize]
}

static TILE_OPS: [TileOps; 4] = [
    TileOps {
        color_type: ColorType::Full,
        tile_words: TILE_PIXELS * 4,
        get_pixel: full::get_pixel,
        set_pixel: full::set_pixel,
        same_color: full::same_color,
        same_rgb: full::same_rgb,
        is_transparent: full::is_transparent,
        to_canonical: full::to_canonical,
        from_canonical: full::from_canonical,
        flip_h: flip_h_words::<4>,
        flip_v: flip_v_words::<4>,
        rotate_left: rotate_left_words::<4>,
        rotate_right: rotate_right_words::<4>,
        serialize: serialize_planes::<4>,
        deserialize: deserialize_planes::<4>,
        blend_tile: full::blend_tile,
    },
    TileOps {
        color_type: ColorType::Tone,
        tile_words: TILE_PIXELS * 2,
        get_pixel: tone::get_pixel,
        set_pixel: tone::set_pixel,
        same_color: tone::same_color,
        same_rgb: tone::same_rgb,
        is_transparent: tone::is_transparent,
        to_canonical: tone::to_canonical,
        from_canonical: tone::from_canonical,
        flip_h: flip_h_words::<2>,
        flip_v: flip_v_words::<2>,
        rotate_left: rotate_left_words::<2>,
        rotate_right: rotate_right_words::<2>,
        serialize: serialize_planes::<2>,
        deserialize: deserialize_planes::<2>,
        blend_tile: tone::blend_tile,
    },
    TileOps {
        color_type: ColorType::Alpha,
        tile_words: TILE_PIXELS,
        get_pixel: alpha::get_pixel,
        set_pixel: alpha::set_pixel,
        same_color: alpha::same_color,
        same_rgb: alpha::same_rgb,
        is_transparent: fold_all_words,
        to_canonical: alpha::to_canonical,
        from_canonical: alpha::from_canonical,
        flip_h: flip_h_words::<1>,
        flip_v: flip_v_words::<1>,
        rotate_left: rotate_left_words::<1>,
        rotate_right: rotate_right_words::<1>,
        serialize: serialize_planes::<1>,
        deserialize: deserialize_planes::<1>,
        blend_tile: alpha::blend_tile,
    },
    TileOps {
        color_type: ColorType::Mask,
        tile_words: TILE_PIXELS / 16,
        get_pixel: mask::get_pixel,
        set_pixel: mask::set_pixel,
        same_color: mask::same_color,
        same_rgb: mask::same_rgb,
        is_transparent: fold_all_words,
        to_canonical: mask::to_canonical,
        from_canonical: mask::from_canonical,
        flip_h: mask::flip_h,
        flip_v: mask::flip_v,
        rotate_left: mask::rotate_left,
        rotate_right: mask::rotate_right,
        serialize: mask::serialize,
        deserialize: mask::deserialize,
        blend_tile: mask::blend_tile,
    },
];

// ---- shared word-layout helpers ------------------------------------------

const N: u32 = TILE_SIZE - 1;

#[inline(always)]
fn word_index<const W: usize>(x: u32, y: u32) -> usize {
    (y as usize * TILE_SIZE as usize + x as usize) * W
}

fn flip_h_words<const W: usize>(t: &mut [u16]) {
    for y in 0..TILE_SIZE {
        for x in 0..TILE_SIZE / 2 {
            let a = word_index::<W>(x, y);
            let b = word_index::<W>(N - x, y);
            for k in 0..W {
                t.swap(a + k, b + k);
            }
        }
    }
}

fn flip_v_words<const W: usize>(t: &mut [u16]) {
    for y in 0..TILE_SIZE / 2 {
        for x in 0..TILE_SIZE {
            let a = word_index::<W>(x, y);
            let b = word_index::<W>(x, N - y);
            for k in 0..W {
                t.swap(a + k, b + k);
            }
        }
    }
}

/// In-place clockwise rotation by 4-cycles over the square tile.
fn rotate_right_words<const W: usize>(t: &mut [u16]) {
    for y in 0..TILE_SIZE / 2 {
        for x in y..N - y {
            let p0 = word_index::<W>(x, y);
            let p1 = word_index::<W>(y, N - x);
            let p2 = word_index::<W>(N - x, N - y);
            let p3 = word_index::<W>(N - y, x);
            for k in 0..W {
                let tmp = t[p0 + k];
                t[p0 + k] = t[p1 + k];
                t[p1 + k] = t[p2 + k];
                t[p2 + k] = t[p3 + k];
                t[p3 + k] = tmp;
            }
        }
    }
}

fn rotate_left_words<const W: usize>(t: &mut [u16]) {
    for y in 0..TILE_SIZE / 2 {
        for x in y..N - y {
            let p0 = word_index::<W>(x, y);
            let p1 = word_index::<W>(y, N - x);
            let p2 = word_index::<W>(N - x, N - y);
            let p3 = word_index::<W>(N - y, x);
            for k in 0..W {
                let tmp = t[p0 + k];
                t[p0 + k] = t[p3 + k];
                t[p3 + k] = t[p2 + k];
                t[p2 + k] = t[p1 + k];
                t[p1 + k] = tmp;
            }
        }
    }
}

fn serialize_planes<const W: usize>(t: &[u16], out: &mut Vec<u8>) {
    out.reserve(t.len() * 2);
    for ch in 0..W {
        for px in 0..TILE_PIXELS {
            out.extend_from_slice(&t[px * W + ch].to_be_bytes());
        }
    }
}

fn deserialize_planes<const W: usize>(t: &mut [u16], bytes: &[u8]) -> bool {
    if bytes.len() != t.len() * 2 {
        return false;
    }
    let mut i = 0;
    for ch in 0..W {
        for px in 0..TILE_PIXELS {
            t[px * W + ch] = u16::from_be_bytes([bytes[i], bytes[i + 1]]);
            i += 2;
        }
    }
    true
}

/// OR-fold every word, two at a time into a 32-bit accumulator.  Used by
/// the layouts whose every word is alpha.
fn fold_all_words(t: &[u16]) -> bool {
    let mut acc = 0u32;
    for pair in t.chunks_exact(2) {
        acc |= pair[0] as u32 | ((pair[1] as u32) << 16);
    }
    acc == 0
}

// ---- Full: interleaved 4×16-bit RGBA -------------------------------------

mod full {
    use super::*;

    pub fn get_pixel(t: &[u16], x: u32, y: u32, _fb: [u16; 3]) -> Pixel15 {
        let i = word_index::<4>(x, y);
        Pixel15 { r: t[i], g: t[i + 1], b: t[i + 2], a: t[i + 3] }
    }

    pub fn set_pixel(t: &mut [u16], x: u32, y: u32, px: &Pixel15) {
        let i = word_index::<4>(x, y);
        t[i] = px.r;
        t[i + 1] = px.g;
        t[i + 2] = px.b;
        t[i + 3] = px.a;
    }

    pub fn same_color(a: &Pixel15, b: &Pixel15) -> bool {
        (a.a == 0 && b.a == 0) || a == b
    }

    pub fn same_rgb(a: &Pixel15, b: &Pixel15) -> bool {
        a.r == b.r && a.g == b.g && a.b == b.b
    }

    pub fn is_transparent(t: &[u16]) -> bool {
        let mut acc = 0u32;
        for px in t.chunks_exact(8) {
            acc |= px[3] as u32 | ((px[7] as u32) << 16);
        }
        acc == 0
    }

    pub fn to_canonical(t: &[u16], _fb: [u16; 3], dst: &mut [Pixel15]) {
        for (px, w) in dst.iter_mut().zip(t.chunks_exact(4)) {
            *px = Pixel15 { r: w[0], g: w[1], b: w[2], a: w[3] };
        }
    }

    pub fn from_canonical(t: &mut [u16], src: &[Pixel15], _luma_to_alpha: bool) {
        for (w, px) in t.chunks_exact_mut(4).zip(src) {
            w[0] = px.r;
            w[1] = px.g;
            w[2] = px.b;
            w[3] = px.a;
        }
    }

    pub fn blend_tile(t: &[u16], ctx: &mut TileBlend<'_>) {
        blend_tile_with(t, ctx, get_pixel);
    }
}

// ---- Tone: interleaved 16-bit luma + alpha -------------------------------

mod tone {
    use super::*;

    pub fn get_pixel(t: &[u16], x: u32, y: u32, _fb: [u16; 3]) -> Pixel15 {
        let i = word_index::<2>(x, y);
        let l = t[i];
        Pixel15 { r: l, g: l, b: l, a: t[i + 1] }
    }

    pub fn set_pixel(t: &mut [u16], x: u32, y: u32, px: &Pixel15) {
        let i = word_index::<2>(x, y);
        t[i] = px.luma();
        t[i + 1] = px.a;
    }

    pub fn same_color(a: &Pixel15, b: &Pixel15) -> bool {
        (a.a == 0 && b.a == 0) || (a.luma() == b.luma() && a.a == b.a)
    }

    pub fn same_rgb(a: &Pixel15, b: &Pixel15) -> bool {
        a.luma() == b.luma()
    }

    pub fn is_transparent(t: &[u16]) -> bool {
        let mut acc = 0u32;
        for px in t.chunks_exact(4) {
            acc |= px[1] as u32 | ((px[3] as u32) << 16);
        }
        acc == 0
    }

    pub fn to_canonical(t: &[u16], _fb: [u16; 3], dst: &mut [Pixel15]) {
        for (px, w) in dst.iter_mut().zip(t.chunks_exact(2)) {
            *px = Pixel15 { r: w[0], g: w[0], b: w[0], a: w[1] };
        }
    }

    pub fn from_canonical(t: &mut [u16], src: &[Pixel15], _luma_to_alpha: bool) {
        for (w, px) in t.chunks_exact_mut(2).zip(src) {
            w[0] = px.luma();
            w[1] = px.a;
        }
    }

    pub fn blend_tile(t: &[u16], ctx: &mut TileBlend<'_>) {
        blend_tile_with(t, ctx, get_pixel);
    }
}

// ---- Alpha: 16-bit alpha only --------------------------------------------

mod alpha {
    use super::*;

    pub fn get_pixel(t: &[u16], x: u32, y: u32, fb: [u16; 3]) -> Pixel15 {
        Pixel15 { r: fb[0], g: fb[1], b: fb[2], a: t[word_index::<1>(x, y)] }
    }

    pub fn set_pixel(t: &mut [u16], x: u32, y: u32, px: &Pixel15) {
        t[word_index::<1>(x, y)] = px.a;
    }

    pub fn same_color(a: &Pixel15, b: &Pixel15) -> bool {
        a.a == b.a
    }

    pub fn same_rgb(_a: &Pixel15, _b: &Pixel15) -> bool {
        true
    }

    pub fn to_canonical(t: &[u16], fb: [u16; 3], dst: &mut [Pixel15]) {
        for (px, &a) in dst.iter_mut().zip(t) {
            *px = Pixel15 { r: fb[0], g: fb[1], b: fb[2], a };
        }
    }

    pub fn from_canonical(t: &mut [u16], src: &[Pixel15], luma_to_alpha: bool) {
        for (w, px) in t.iter_mut().zip(src) {
            *w = if luma_to_alpha { FIX15_ONE - px.luma() } else { px.a };
        }
    }

    pub fn blend_tile(t: &[u16], ctx: &mut TileBlend<'_>) {
        blend_tile_with(t, ctx, get_pixel);
    }
}

// ---- Mask: 1-bit alpha ---------------------------------------------------

mod mask {
    use super::*;

    /// Words per mask row.
    const ROW_WORDS: u32 = TILE_SIZE / 16;

    #[inline(always)]
    fn get_bit(t: &[u16], x: u32, y: u32) -> bool {
        (t[(y * ROW_WORDS + x / 16) as usize] >> (15 - (x & 15))) & 1 != 0
    }

    #[inline(always)]
    fn set_bit(t: &mut [u16], x: u32, y: u32, on: bool) {
        let w = &mut t[(y * ROW_WORDS + x / 16) as usize];
        let bit = 1u16 << (15 - (x & 15));
        if on {
            *w |= bit;
        } else {
            *w &= !bit;
        }
    }

    pub fn get_pixel(t: &[u16], x: u32, y: u32, fb: [u16; 3]) -> Pixel15 {
        let a = if get_bit(t, x, y) { FIX15_ONE } else { 0 };
        Pixel15 { r: fb[0], g: fb[1], b: fb[2], a }
    }

    pub fn set_pixel(t: &mut [u16], x: u32, y: u32, px: &Pixel15) {
        set_bit(t, x, y, px.a >= FIX15_HALF);
    }

    pub fn same_color(a: &Pixel15, b: &Pixel15) -> bool {
        (a.a >= FIX15_HALF) == (b.a >= FIX15_HALF)
    }

    pub fn same_rgb(_a: &Pixel15, _b: &Pixel15) -> bool {
        true
    }

    pub fn to_canonical(t: &[u16], fb: [u16; 3], dst: &mut [Pixel15]) {
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                dst[(y * TILE_SIZE + x) as usize] = get_pixel(t, x, y, fb);
            }
        }
    }

    pub fn from_canonical(t: &mut [u16], src: &[Pixel15], luma_to_alpha: bool) {
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                let px = &src[(y * TILE_SIZE + x) as usize];
                let a = if luma_to_alpha { FIX15_ONE - px.luma() } else { px.a };
                set_bit(t, x, y, a >= FIX15_HALF);
            }
        }
    }

    pub fn flip_h(t: &mut [u16]) {
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE / 2 {
                let a = get_bit(t, x, y);
                let b = get_bit(t, N - x, y);
                set_bit(t, x, y, b);
                set_bit(t, N - x, y, a);
            }
        }
    }

    pub fn flip_v(t: &mut [u16]) {
        for y in 0..TILE_SIZE / 2 {
            // Whole rows swap word-at-a-time.
            for w in 0..ROW_WORDS {
                t.swap((y * ROW_WORDS + w) as usize, ((N - y) * ROW_WORDS + w) as usize);
            }
        }
    }

    pub fn rotate_right(t: &mut [u16]) {
        for y in 0..TILE_SIZE / 2 {
            for x in y..N - y {
                let tmp = get_bit(t, x, y);
                set_bit(t, x, y, get_bit(t, y, N - x));
                set_bit(t, y, N - x, get_bit(t, N - x, N - y));
                set_bit(t, N - x, N - y, get_bit(t, N - y, x));
                set_bit(t, N - y, x, tmp);
            }
        }
    }

    pub fn rotate_left(t: &mut [u16]) {
        for y in 0..TILE_SIZE / 2 {
            for x in y..N - y {
                let tmp = get_bit(t, x, y);
                set_bit(t, x, y, get_bit(t, N - y, x));
                set_bit(t, N - y, x, get_bit(t, N - x, N - y));
                set_bit(t, N - x, N - y, get_bit(t, y, N - x));
                set_bit(t, y, N - x, tmp);
            }
        }
    }

    pub fn serialize(t: &[u16], out: &mut Vec<u8>) {
        out.reserve(t.len() * 2);
        for w in t {
            out.extend_from_slice(&w.to_be_bytes());
        }
    }

    pub fn deserialize(t: &mut [u16], bytes: &[u8]) -> bool {
        if bytes.len() != t.len() * 2 {
            return false;
        }
        for (w, b) in t.iter_mut().zip(bytes.chunks_exact(2)) {
            *w = u16::from_be_bytes([b[0], b[1]]);
        }
        true
    }

    pub fn blend_tile(t: &[u16], ctx: &mut TileBlend<'_>) {
        blend_tile_with(t, ctx, get_pixel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_tile(ops: &TileOps) -> Vec<u16> {
        vec![0u16; ops.tile_words]
    }

    /// A deterministic pixel pattern exercising every channel.
    fn pattern_pixel(x: u32, y: u32) -> Pixel15 {
        Pixel15 {
            r: ((x * 517 + y * 31) % 0x8001) as u16,
            g: ((x * 263 + y * 97) % 0x8001) as u16,
            b: ((x * 101 + y * 7) % 0x8001) as u16,
            a: if (x + y) % 3 == 0 { 0 } else { ((x * 409 + y * 13) % 0x8001) as u16 },
        }
    }

    fn fill_pattern(ops: &TileOps, t: &mut [u16]) {
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                (ops.set_pixel)(t, x, y, &pattern_pixel(x, y));
            }
        }
    }

    const FB: [u16; 3] = [0x1111, 0x2222, 0x3333];

    #[test]
    fn canonical_round_trip_is_idempotent_for_all_types() {
        for &ct in ColorType::all() {
            let ops = tile_ops(ct);
            let mut tile = fresh_tile(ops);
            fill_pattern(ops, &mut tile);

            let mut canon = vec![Pixel15::TRANSPARENT; TILE_PIXELS];
            (ops.to_canonical)(&tile, FB, &mut canon);

            // First round trip may lose RGB precision (documented for
            // Tone/Alpha/Mask); the second must be exact.
            let mut tile2 = fresh_tile(ops);
            (ops.from_canonical)(&mut tile2, &canon, false);
            let mut canon2 = vec![Pixel15::TRANSPARENT; TILE_PIXELS];
            (ops.to_canonical)(&tile2, FB, &mut canon2);

            let mut tile3 = fresh_tile(ops);
            (ops.from_canonical)(&mut tile3, &canon2, false);
            assert_eq!(tile2, tile3, "{} round trip not idempotent", ct.name());
        }
    }

    #[test]
    fn full_round_trip_is_exact() {
        let ops = tile_ops(ColorType::Full);
        let mut tile = fresh_tile(ops);
        fill_pattern(ops, &mut tile);
        let mut canon = vec![Pixel15::TRANSPARENT; TILE_PIXELS];
        (ops.to_canonical)(&tile, FB, &mut canon);
        let mut back = fresh_tile(ops);
        (ops.from_canonical)(&mut back, &canon, false);
        assert_eq!(tile, back);
    }

    #[test]
    fn tone_loses_rgb_to_documented_luma() {
        let ops = tile_ops(ColorType::Tone);
        let mut tile = fresh_tile(ops);
        let px = Pixel15 { r: 0x8000, g: 0, b: 0, a: 0x8000 };
        (ops.set_pixel)(&mut tile, 5, 9, &px);
        let got = (ops.get_pixel)(&tile, 5, 9, FB);
        let expect = ((0x8000u32 * 77 + 128) >> 8) as u16;
        assert_eq!(got.r, expect);
        assert_eq!(got.r, got.g);
        assert_eq!(got.g, got.b);
        assert_eq!(got.a, 0x8000);
    }

    #[test]
    fn serialize_round_trips_every_type() {
        for &ct in ColorType::all() {
            let ops = tile_ops(ct);
            let mut tile = fresh_tile(ops);
            fill_pattern(ops, &mut tile);
            let mut bytes = Vec::new();
            (ops.serialize)(&tile, &mut bytes);
            assert_eq!(bytes.len(), ct.tile_bytes(), "{}", ct.name());
            let mut back = fresh_tile(ops);
            assert!((ops.deserialize)(&mut back, &bytes));
            assert_eq!(tile, back, "{} serialize round trip", ct.name());
            // Wrong size must be rejected, not partially applied.
            assert!(!(ops.deserialize)(&mut back, &bytes[1..]));
        }
    }

    #[test]
    fn full_serialized_form_is_plane_separated_big_endian() {
        let ops = tile_ops(ColorType::Full);
        let mut tile = fresh_tile(ops);
        let px = Pixel15 { r: 0x0102, g: 0x0304, b: 0x0506, a: 0x0708 };
        (ops.set_pixel)(&mut tile, 0, 0, &px);
        let mut bytes = Vec::new();
        (ops.serialize)(&tile, &mut bytes);
        // First pixel of each plane, big-endian.
        assert_eq!(&bytes[0..2], &[0x01, 0x02]);
        let plane = TILE_PIXELS * 2;
        assert_eq!(&bytes[plane..plane + 2], &[0x03, 0x04]);
        assert_eq!(&bytes[2 * plane..2 * plane + 2], &[0x05, 0x06]);
        assert_eq!(&bytes[3 * plane..3 * plane + 2], &[0x07, 0x08]);
    }

    #[test]
    fn double_flip_and_four_rotations_are_identity() {
        for &ct in ColorType::all() {
            let ops = tile_ops(ct);
            let mut tile = fresh_tile(ops);
            fill_pattern(ops, &mut tile);
            let orig = tile.clone();

            (ops.flip_h)(&mut tile);
            assert_ne!(tile, orig, "{} flip_h must move pixels", ct.name());
            (ops.flip_h)(&mut tile);
            assert_eq!(tile, orig, "{} double flip_h", ct.name());

            (ops.flip_v)(&mut tile);
            (ops.flip_v)(&mut tile);
            assert_eq!(tile, orig, "{} double flip_v", ct.name());

            (ops.rotate_right)(&mut tile);
            (ops.rotate_left)(&mut tile);
            assert_eq!(tile, orig, "{} rotate right+left", ct.name());

            for _ in 0..4 {
                (ops.rotate_right)(&mut tile);
            }
            assert_eq!(tile, orig, "{} four right rotations", ct.name());
        }
    }

    #[test]
    fn rotate_right_moves_the_corner() {
        let ops = tile_ops(ColorType::Alpha);
        let mut tile = fresh_tile(ops);
        let px = Pixel15 { r: 0, g: 0, b: 0, a: 0x4321 };
        (ops.set_pixel)(&mut tile, 0, 0, &px);
        (ops.rotate_right)(&mut tile);
        // Top-left goes to top-right under a clockwise rotation.
        assert_eq!((ops.get_pixel)(&tile, 63, 0, FB).a, 0x4321);
        assert_eq!((ops.get_pixel)(&tile, 0, 0, FB).a, 0);
    }

    #[test]
    fn transparency_scan_per_type() {
        for &ct in ColorType::all() {
            let ops = tile_ops(ct);
            let mut tile = fresh_tile(ops);
            assert!((ops.is_transparent)(&tile), "{} zeroed tile", ct.name());
            // Stale RGB with zero alpha is still transparent for Full/Tone.
            if ct.has_rgb() {
                let stale = Pixel15 { r: 0x7000, g: 0x100, b: 0x3000, a: 0 };
                (ops.set_pixel)(&mut tile, 10, 10, &stale);
                assert!((ops.is_transparent)(&tile), "{} stale rgb", ct.name());
            }
            (ops.set_pixel)(&mut tile, 63, 63, &Pixel15::rgb(1, 2, 3));
            assert!(!(ops.is_transparent)(&tile), "{} opaque pixel", ct.name());
        }
    }

    #[test]
    fn transparent_pixels_compare_equal_despite_stale_rgb() {
        let a = Pixel15 { r: 0x1234, g: 0, b: 0x7fff, a: 0 };
        let b = Pixel15 { r: 0, g: 0x4000, b: 0, a: 0 };
        for &ct in ColorType::all() {
            let ops = tile_ops(ct);
            assert!((ops.same_color)(&a, &b), "{}", ct.name());
        }
    }

    #[test]
    fn same_rgb_ignores_alpha_and_degenerates_for_alpha_types() {
        let a = Pixel15 { r: 0x1000, g: 0x2000, b: 0x3000, a: 0x8000 };
        let b = Pixel15 { r: 0x1000, g: 0x2000, b: 0x3000, a: 0 };
        let c = Pixel15 { r: 0x7000, g: 0x2000, b: 0x3000, a: 0x8000 };
        assert!((tile_ops(ColorType::Full).same_rgb)(&a, &b));
        assert!(!(tile_ops(ColorType::Full).same_rgb)(&a, &c));
        assert!((tile_ops(ColorType::Alpha).same_rgb)(&a, &c));
        assert!((tile_ops(ColorType::Mask).same_rgb)(&a, &c));
    }

    #[test]
    fn mask_thresholds_at_half() {
        let ops = tile_ops(ColorType::Mask);
        let mut tile = fresh_tile(ops);
        (ops.set_pixel)(&mut tile, 1, 1, &Pixel15 { r: 0, g: 0, b: 0, a: FIX15_HALF });
        (ops.set_pixel)(&mut tile, 2, 1, &Pixel15 { r: 0, g: 0, b: 0, a: FIX15_HALF - 1 });
        assert_eq!((ops.get_pixel)(&tile, 1, 1, FB).a, FIX15_ONE);
        assert_eq!((ops.get_pixel)(&tile, 2, 1, FB).a, 0);
    }

    #[test]
    fn alpha_types_take_rgb_from_fallback() {
        for &ct in &[ColorType::Alpha, ColorType::Mask] {
            let ops = tile_ops(ct);
            let mut tile = fresh_tile(ops);
            (ops.set_pixel)(&mut tile, 3, 4, &Pixel15 { r: 0, g: 0, b: 0, a: FIX15_ONE });
            let px = (ops.get_pixel)(&tile, 3, 4, FB);
            assert_eq!([px.r, px.g, px.b], FB, "{}", ct.name());
        }
    }

    #[test]
    fn luma_to_alpha_inverts_ink() {
        // Dark ink becomes opaque, white paper transparent.
        let ops = tile_ops(ColorType::Alpha);
        let mut canon = vec![Pixel15::rgb(FIX15_ONE, FIX15_ONE, FIX15_ONE); TILE_PIXELS];
        canon[0] = Pixel15::rgb(0, 0, 0);
        let mut tile = fresh_tile(ops);
        (ops.from_canonical)(&mut tile, &canon, true);
        assert_eq!(tile[0], FIX15_ONE);
        assert_eq!(tile[1], 0);
    }
}
