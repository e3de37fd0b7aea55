//! Sparse tiled pixel store — fixed 64×64 tiles over a flat slot array.
//!
//! The grid is a dense `Vec<Option<Box<[u16]>>>` indexed by
//! `ty * tiles_w + tx`: O(1) access with zero hashing overhead.  `None`
//! means the tile is absent and everything under it fully transparent; a
//! tile is allocated (zero-filled) on the first write that lands in it.
//! The grid's pixel-space origin is a signed offset, so the grid can hang
//! past any canvas edge and the canvas can grow in any direction without
//! relocating existing tiles.
//!
//! An allocated tile is allowed to become fully transparent again
//! (transient slack); editors call [`TileStore::free_empty_tiles`] after a
//! bulk operation to reclaim it.
//!
//! All allocation goes through `try_reserve`, so running out of memory
//! surfaces as [`Error::OutOfMemory`] on the current edit instead of
//! aborting the process; a failed multi-tile operation never leaves a
//! dangling slot.

use image::RgbaImage;
use rayon::prelude::*;

use crate::blend::BlendMode;
use crate::codec::{tile_ops, TileOps};
use crate::composite::{RenderBuffer, TexturePattern, TileBlend, OPACITY_MAX};
use crate::error::{Error, Result};
use crate::log_warn;
use crate::pixel::{ColorType, Pixel15, FIX15_ONE, TILE_PIXELS, TILE_SIZE};
use crate::progress::ProgressState;

/// Dimension sanity limit (~256 megapixels).
const MAX_PIXELS: u64 = 256_000_000;

/// A pixel-space rectangle (canvas coordinates, may start negative).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

/// A rectangle of tile-grid slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRect {
    pub tx: u32,
    pub ty: u32,
    pub tw: u32,
    pub th: u32,
}

impl TileRect {
    pub const EMPTY: TileRect = TileRect { tx: 0, ty: 0, tw: 0, th: 0 };

    pub fn tile_count(&self) -> usize {
        self.tw as usize * self.th as usize
    }
}

/// How `set_pixel` combines the incoming pixel with what is stored.
/// Each policy is a distinct color-combining function used by a different
/// brush/tool family, not a different storage path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Direct overwrite.
    #[default]
    Replace,
    /// Keep whichever pixel has the higher alpha — prevents opacity
    /// stacking when a stroke crosses itself.
    Compare,
    /// Source-over accumulate.
    Blend,
}

/// The sparse tile store for one image.
pub struct TileStore {
    width: u32,
    height: u32,
    /// Canvas pixel coordinate of tile (0,0)'s top-left corner.
    origin_x: i32,
    origin_y: i32,
    /// Grid size in tiles.
    tiles_w: u32,
    tiles_h: u32,
    color_type: ColorType,
    ops: &'static TileOps,
    /// RGB substituted for the alpha-only color types.
    fallback: [u16; 3],
    slots: Vec<Option<Box<[u16]>>>,
}

fn alloc_slots(n: usize) -> Result<Vec<Option<Box<[u16]>>>> {
    let mut v = Vec::new();
    v.try_reserve_exact(n).map_err(|_| Error::OutOfMemory)?;
    v.resize_with(n, || None);
    Ok(v)
}

fn alloc_tile(words: usize) -> Result<Box<[u16]>> {
    let mut v = Vec::new();
    v.try_reserve_exact(words).map_err(|_| Error::OutOfMemory)?;
    v.resize(words, 0u16);
    Ok(v.into_boxed_slice())
}

impl TileStore {
    /// Create an empty (fully transparent) store.  Allocates the slot
    /// grid only, never the tiles.
    pub fn new(color_type: ColorType, width: u32, height: u32) -> Result<Self> {
        let (width, height) = {
            let total = width as u64 * height as u64;
            if total > MAX_PIXELS || width == 0 || height == 0 {
                log_warn!(
                    "TileStore::new: dimensions {}x{} out of range, clamped to 1x1",
                    width,
                    height
                );
                (1, 1)
            } else {
                (width, height)
            }
        };
        let tiles_w = width.div_ceil(TILE_SIZE);
        let tiles_h = height.div_ceil(TILE_SIZE);
        let slots = alloc_slots(tiles_w as usize * tiles_h as usize)?;
        Ok(Self {
            width,
            height,
            origin_x: 0,
            origin_y: 0,
            tiles_w,
            tiles_h,
            color_type,
            ops: tile_ops(color_type),
            fallback: [0, 0, 0],
            slots,
        })
    }

    // ---- accessors ----------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color_type(&self) -> ColorType {
        self.color_type
    }

    pub fn origin(&self) -> (i32, i32) {
        (self.origin_x, self.origin_y)
    }

    /// Grid size in tiles.
    pub fn grid_size(&self) -> (u32, u32) {
        (self.tiles_w, self.tiles_h)
    }

    pub fn fallback_color(&self) -> [u16; 3] {
        self.fallback
    }

    /// Set the RGB substituted for the Alpha/Mask color types.
    pub fn set_fallback_color(&mut self, rgb: [u16; 3]) {
        self.fallback = rgb;
    }

    /// Number of allocated tiles.
    pub fn tile_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Approximate memory usage in bytes (tiles + slot array).
    pub fn memory_bytes(&self) -> usize {
        self.tile_count() * self.ops.tile_words * 2
            + self.slots.len() * std::mem::size_of::<Option<Box<[u16]>>>()
    }

    // ---- indexing helpers ---------------------------------------------------

    #[inline(always)]
    fn slot_index(&self, tx: i32, ty: i32) -> Option<usize> {
        if tx < 0 || ty < 0 || tx >= self.tiles_w as i32 || ty >= self.tiles_h as i32 {
            return None;
        }
        Some(ty as usize * self.tiles_w as usize + tx as usize)
    }

    /// Map a canvas pixel to (tile, local) coordinates.
    #[inline(always)]
    fn locate(&self, x: i32, y: i32) -> (i32, i32, u32, u32) {
        let rx = x - self.origin_x;
        let ry = y - self.origin_y;
        let ts = TILE_SIZE as i32;
        (
            rx.div_euclid(ts),
            ry.div_euclid(ts),
            rx.rem_euclid(ts) as u32,
            ry.rem_euclid(ts) as u32,
        )
    }

    /// Canvas pixel coordinate of a tile's top-left corner.
    #[inline]
    fn tile_origin(&self, tx: u32, ty: u32) -> (i32, i32) {
        (
            self.origin_x + (tx * TILE_SIZE) as i32,
            self.origin_y + (ty * TILE_SIZE) as i32,
        )
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel in canonical form.  Total: coordinates outside the
    /// canvas or over an absent tile yield the fallback color with zero
    /// alpha — filters rely on sampling with a one-pixel border.
    #[inline]
    pub fn get_pixel(&self, x: i32, y: i32) -> Pixel15 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return Pixel15 { r: self.fallback[0], g: self.fallback[1], b: self.fallback[2], a: 0 };
        }
        let (tx, ty, lx, ly) = self.locate(x, y);
        match self.slot_index(tx, ty).and_then(|i| self.slots[i].as_deref()) {
            Some(tile) => (self.ops.get_pixel)(tile, lx, ly, self.fallback),
            None => Pixel15 { r: self.fallback[0], g: self.fallback[1], b: self.fallback[2], a: 0 },
        }
    }

    /// Write a pixel in canonical form, allocating the tile on first
    /// write.  Out-of-bounds writes are ignored.  A fully transparent
    /// write to an absent tile is a no-op and allocates nothing.
    pub fn set_pixel(&mut self, x: i32, y: i32, px: &Pixel15, policy: WritePolicy) -> Result<()> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return Ok(());
        }
        let (tx, ty, lx, ly) = self.locate(x, y);
        let Some(idx) = self.slot_index(tx, ty) else {
            return Ok(());
        };
        if self.slots[idx].is_none() {
            if px.a == 0 {
                return Ok(());
            }
            self.slots[idx] = Some(alloc_tile(self.ops.tile_words)?);
        }
        let ops = self.ops;
        let fallback = self.fallback;
        let tile = self.slots[idx].as_deref_mut().expect("slot allocated above");
        match policy {
            WritePolicy::Replace => (ops.set_pixel)(tile, lx, ly, px),
            WritePolicy::Compare => {
                let old = (ops.get_pixel)(tile, lx, ly, fallback);
                if px.a > old.a {
                    (ops.set_pixel)(tile, lx, ly, px);
                }
            }
            WritePolicy::Blend => {
                let old = (ops.get_pixel)(tile, lx, ly, fallback);
                let blended = source_over(px, &old);
                (ops.set_pixel)(tile, lx, ly, &blended);
            }
        }
        Ok(())
    }

    // ---- resizes ------------------------------------------------------------

    /// Move the grid origin: an O(1) remap of the pixel-to-tile mapping.
    /// Tiles keep their content; pixels that no longer map into the grid
    /// read as transparent until the grid is regrown.
    pub fn resize_offset(&mut self, origin_x: i32, origin_y: i32) -> Result<()> {
        self.origin_x = origin_x;
        self.origin_y = origin_y;
        Ok(())
    }

    /// Change the canvas size, growing the slot grid to the union of the
    /// old grid and the new canvas.  All-or-nothing: on allocation
    /// failure the store is left exactly as it was.
    pub fn resize_grow(&mut self, new_width: u32, new_height: u32) -> Result<()> {
        let total = new_width as u64 * new_height as u64;
        if total > MAX_PIXELS || new_width == 0 || new_height == 0 {
            log_warn!("TileStore::resize_grow: rejecting {}x{}", new_width, new_height);
            return Ok(());
        }
        let ts = TILE_SIZE as i32;

        // Tile span the new canvas needs, in current grid coordinates.
        let need_x0 = (0 - self.origin_x).div_euclid(ts);
        let need_y0 = (0 - self.origin_y).div_euclid(ts);
        let need_x1 = (new_width as i32 - 1 - self.origin_x).div_euclid(ts) + 1;
        let need_y1 = (new_height as i32 - 1 - self.origin_y).div_euclid(ts) + 1;

        // Union with the existing grid.
        let lo_x = need_x0.min(0);
        let lo_y = need_y0.min(0);
        let hi_x = need_x1.max(self.tiles_w as i32);
        let hi_y = need_y1.max(self.tiles_h as i32);
        let new_tw = (hi_x - lo_x) as u32;
        let new_th = (hi_y - lo_y) as u32;

        if new_tw == self.tiles_w && new_th == self.tiles_h {
            self.width = new_width;
            self.height = new_height;
            return Ok(());
        }

        let mut new_slots = alloc_slots(new_tw as usize * new_th as usize)?;
        for ty in 0..self.tiles_h {
            for tx in 0..self.tiles_w {
                let old_idx = ty as usize * self.tiles_w as usize + tx as usize;
                if let Some(tile) = self.slots[old_idx].take() {
                    let nx = (tx as i32 - lo_x) as usize;
                    let ny = (ty as i32 - lo_y) as usize;
                    new_slots[ny * new_tw as usize + nx] = Some(tile);
                }
            }
        }
        self.slots = new_slots;
        self.tiles_w = new_tw;
        self.tiles_h = new_th;
        self.origin_x += lo_x * ts;
        self.origin_y += lo_y * ts;
        self.width = new_width;
        self.height = new_height;
        Ok(())
    }

    // ---- sweeps -------------------------------------------------------------

    /// Free every tile that is provably fully transparent.  Returns the
    /// number of tiles freed.  Called after bulk edits, not per write.
    pub fn free_empty_tiles(&mut self) -> usize {
        let ops = self.ops;
        self.slots
            .par_iter_mut()
            .map(|slot| {
                if let Some(tile) = slot.as_deref() {
                    if (ops.is_transparent)(tile) {
                        *slot = None;
                        return 1usize;
                    }
                }
                0usize
            })
            .sum()
    }

    /// Convert every tile to a new color type via the canonical form.
    /// Tiles fully transparent under the new type are freed.  The
    /// replacement grid is built first, so a failure (or cancellation —
    /// `Ok(false)`) leaves the store untouched.
    pub fn convert_type(
        &mut self,
        new_type: ColorType,
        luma_to_alpha: bool,
        progress: Option<&ProgressState>,
    ) -> Result<bool> {
        if new_type == self.color_type {
            return Ok(true);
        }
        let new_ops = tile_ops(new_type);
        let mut new_slots = alloc_slots(self.slots.len())?;
        let mut canon = vec![Pixel15::TRANSPARENT; TILE_PIXELS];

        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(p) = progress {
                if p.is_cancelled() {
                    return Ok(false);
                }
            }
            let Some(tile) = slot.as_deref() else { continue };
            (self.ops.to_canonical)(tile, self.fallback, &mut canon);
            let mut converted = alloc_tile(new_ops.tile_words)?;
            (new_ops.from_canonical)(&mut converted, &canon, luma_to_alpha);
            if !(new_ops.is_transparent)(&converted) {
                new_slots[idx] = Some(converted);
            }
            if let Some(p) = progress {
                p.advance(1);
            }
        }

        self.slots = new_slots;
        self.ops = new_ops;
        self.color_type = new_type;
        Ok(true)
    }

    // ---- whole-image geometry ----------------------------------------------

    /// Mirror the image about its vertical center line.  Exact — tiles
    /// swap places in the grid and flip internally, no resampling.
    pub fn flip_horizontal(&mut self) {
        let tw = self.tiles_w as usize;
        for row in self.slots.chunks_exact_mut(tw) {
            row.reverse();
        }
        for slot in &mut self.slots {
            if let Some(tile) = slot.as_deref_mut() {
                (self.ops.flip_h)(tile);
            }
        }
        self.origin_x = self.width as i32 - self.origin_x - (self.tiles_w * TILE_SIZE) as i32;
    }

    /// Mirror the image about its horizontal center line.
    pub fn flip_vertical(&mut self) {
        let tw = self.tiles_w as usize;
        let th = self.tiles_h as usize;
        for ty in 0..th / 2 {
            for tx in 0..tw {
                self.slots.swap(ty * tw + tx, (th - 1 - ty) * tw + tx);
            }
        }
        for slot in &mut self.slots {
            if let Some(tile) = slot.as_deref_mut() {
                (self.ops.flip_v)(tile);
            }
        }
        self.origin_y = self.height as i32 - self.origin_y - (self.tiles_h * TILE_SIZE) as i32;
    }

    /// Rotate the whole image 90° clockwise.  The slot grid transposes
    /// (tiles are square) and every retained tile rotates in place.
    pub fn rotate_right(&mut self) -> Result<()> {
        let mut new_slots = alloc_slots(self.slots.len())?;
        let (tw, th) = (self.tiles_w, self.tiles_h);
        for ty in 0..th {
            for tx in 0..tw {
                let idx = (ty * tw + tx) as usize;
                if let Some(mut tile) = self.slots[idx].take() {
                    (self.ops.rotate_right)(&mut tile);
                    let (nx, ny) = (th - 1 - ty, tx);
                    new_slots[(ny * th + nx) as usize] = Some(tile);
                }
            }
        }
        let new_origin_x = self.height as i32 - self.origin_y - (th * TILE_SIZE) as i32;
        let new_origin_y = self.origin_x;
        self.slots = new_slots;
        self.tiles_w = th;
        self.tiles_h = tw;
        std::mem::swap(&mut self.width, &mut self.height);
        self.origin_x = new_origin_x;
        self.origin_y = new_origin_y;
        Ok(())
    }

    /// Rotate the whole image 90° counter-clockwise.
    pub fn rotate_left(&mut self) -> Result<()> {
        let mut new_slots = alloc_slots(self.slots.len())?;
        let (tw, th) = (self.tiles_w, self.tiles_h);
        for ty in 0..th {
            for tx in 0..tw {
                let idx = (ty * tw + tx) as usize;
                if let Some(mut tile) = self.slots[idx].take() {
                    (self.ops.rotate_left)(&mut tile);
                    let (nx, ny) = (ty, tw - 1 - tx);
                    new_slots[(ny * th + nx) as usize] = Some(tile);
                }
            }
        }
        let new_origin_x = self.origin_y;
        let new_origin_y = self.width as i32 - self.origin_x - (tw * TILE_SIZE) as i32;
        self.slots = new_slots;
        self.tiles_w = th;
        self.tiles_h = tw;
        std::mem::swap(&mut self.width, &mut self.height);
        self.origin_x = new_origin_x;
        self.origin_y = new_origin_y;
        Ok(())
    }

    // ---- compositing --------------------------------------------------------

    /// Blend every tile overlapping `region` into the accumulation
    /// buffer.  Absent tiles contribute nothing and are skipped outright.
    /// `opacity` is `0..=128`.  Bands are carved at tile-row boundaries
    /// and composited in parallel.
    pub fn composite_into(
        &self,
        dst: &mut RenderBuffer,
        region: &PixelRect,
        opacity: u8,
        mode: BlendMode,
        texture: Option<&TexturePattern>,
        progress: Option<&ProgressState>,
    ) {
        let opacity = (opacity as i32).min(OPACITY_MAX);
        if opacity == 0 || region.is_empty() {
            return;
        }
        let x0 = region.x.max(0);
        let y0 = region.y.max(0);
        let x1 = (region.x + region.w as i32).min(self.width.min(dst.width()) as i32);
        let y1 = (region.y + region.h as i32).min(self.height.min(dst.height()) as i32);
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        let clip = PixelRect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32);

        let ts = TILE_SIZE as i32;
        let tx0 = (x0 - self.origin_x).div_euclid(ts);
        let tx1 = (x1 - 1 - self.origin_x).div_euclid(ts);
        let ty0 = (y0 - self.origin_y).div_euclid(ts);
        let ty1 = (y1 - 1 - self.origin_y).div_euclid(ts);

        let buf_width = dst.width();
        let stride = buf_width as usize * 3;

        // Carve the buffer into disjoint horizontal bands, one per tile
        // row, so rayon workers never alias.
        let mut bands: Vec<(i32, i32, &mut [u16])> = Vec::new();
        let mut rest: &mut [u16] = dst.raw_mut();
        let mut carved_rows = 0usize;
        for ty in ty0..=ty1 {
            let band_y0 = y0.max(self.origin_y + ty * ts);
            let band_y1 = y1.min(self.origin_y + (ty + 1) * ts);
            if band_y0 >= band_y1 {
                continue;
            }
            let (_, tail) =
                std::mem::take(&mut rest).split_at_mut((band_y0 as usize - carved_rows) * stride);
            let (band, tail) = tail.split_at_mut((band_y1 - band_y0) as usize * stride);
            rest = tail;
            carved_rows = band_y1 as usize;
            bands.push((ty, band_y0, band));
        }

        let fallback = self.fallback;
        bands.into_par_iter().for_each(|(ty, band_y, rows)| {
            if progress.map(|p| p.is_cancelled()).unwrap_or(false) {
                return;
            }
            for tx in tx0..=tx1 {
                let Some(idx) = self.slot_index(tx, ty) else { continue };
                let Some(tile) = self.slots[idx].as_deref() else { continue };
                let mut ctx = TileBlend {
                    rows: &mut *rows,
                    band_y,
                    buf_width,
                    tile_x: self.origin_x + tx * ts,
                    tile_y: self.origin_y + ty * ts,
                    clip,
                    opacity,
                    mode,
                    texture,
                    fallback,
                };
                (self.ops.blend_tile)(tile, &mut ctx);
            }
            if let Some(p) = progress {
                p.advance(1);
            }
        });
    }

    // ---- tile-granular access (undo snapshots) ------------------------------

    /// The span of grid slots touched by a pixel rectangle, clamped to
    /// the grid.  Empty input (or no overlap) yields an empty rect.
    pub fn tile_rect_for_pixels(&self, rect: &PixelRect) -> TileRect {
        if rect.is_empty() {
            return TileRect::EMPTY;
        }
        let ts = TILE_SIZE as i32;
        let x0 = rect.x.max(0);
        let y0 = rect.y.max(0);
        let x1 = (rect.x + rect.w as i32).min(self.width as i32);
        let y1 = (rect.y + rect.h as i32).min(self.height as i32);
        if x0 >= x1 || y0 >= y1 {
            return TileRect::EMPTY;
        }
        let tx0 = (x0 - self.origin_x).div_euclid(ts).max(0);
        let ty0 = (y0 - self.origin_y).div_euclid(ts).max(0);
        let tx1 = (x1 - 1 - self.origin_x).div_euclid(ts).min(self.tiles_w as i32 - 1);
        let ty1 = (y1 - 1 - self.origin_y).div_euclid(ts).min(self.tiles_h as i32 - 1);
        if tx0 > tx1 || ty0 > ty1 {
            return TileRect::EMPTY;
        }
        TileRect {
            tx: tx0 as u32,
            ty: ty0 as u32,
            tw: (tx1 - tx0 + 1) as u32,
            th: (ty1 - ty0 + 1) as u32,
        }
    }

    pub fn tile_present(&self, tx: u32, ty: u32) -> bool {
        self.slot_index(tx as i32, ty as i32)
            .map(|i| self.slots[i].is_some())
            .unwrap_or(false)
    }

    /// Plane-separated big-endian bytes of a tile, or `None` if absent.
    pub fn tile_serialized(&self, tx: u32, ty: u32) -> Option<Vec<u8>> {
        let idx = self.slot_index(tx as i32, ty as i32)?;
        let tile = self.slots[idx].as_deref()?;
        let mut out = Vec::new();
        (self.ops.serialize)(tile, &mut out);
        Some(out)
    }

    /// Install a tile from its serialized form, allocating the slot's
    /// buffer.  A size mismatch (or a coordinate outside the grid) is
    /// [`Error::CorruptUndoData`]; the slot is untouched in that case.
    pub fn set_tile_serialized(&mut self, tx: u32, ty: u32, bytes: &[u8]) -> Result<()> {
        let expected = self.color_type.tile_bytes();
        let Some(idx) = self.slot_index(tx as i32, ty as i32) else {
            return Err(Error::CorruptUndoData { expected, got: bytes.len() });
        };
        let mut tile = alloc_tile(self.ops.tile_words)?;
        if !(self.ops.deserialize)(&mut tile, bytes) {
            return Err(Error::CorruptUndoData { expected, got: bytes.len() });
        }
        self.slots[idx] = Some(tile);
        Ok(())
    }

    /// Drop a tile (everything under it becomes transparent).
    pub fn clear_tile(&mut self, tx: u32, ty: u32) {
        if let Some(idx) = self.slot_index(tx as i32, ty as i32) {
            self.slots[idx] = None;
        }
    }

    // ---- 8-bit boundary -----------------------------------------------------

    /// Import from a flat 8-bit RGBA image.  Only tiles with any coverage
    /// are stored; chunk conversion is parallelised with rayon.
    pub fn from_rgba_image(img: &RgbaImage, color_type: ColorType) -> Result<Self> {
        let mut store = Self::new(color_type, img.width(), img.height())?;
        let ops = store.ops;
        let tiles_w = store.tiles_w as usize;
        let (width, height) = (store.width, store.height);

        let results: Result<Vec<(usize, Option<Box<[u16]>>)>> = (0..store.slots.len())
            .into_par_iter()
            .map(|flat| {
                let tx = (flat % tiles_w) as u32;
                let ty = (flat / tiles_w) as u32;
                let base_x = tx * TILE_SIZE;
                let base_y = ty * TILE_SIZE;
                let cw = TILE_SIZE.min(width - base_x);
                let ch = TILE_SIZE.min(height - base_y);

                let mut tile: Option<Box<[u16]>> = None;
                for ly in 0..ch {
                    for lx in 0..cw {
                        let px8 = *img.get_pixel(base_x + lx, base_y + ly);
                        if px8[3] == 0 {
                            continue;
                        }
                        if tile.is_none() {
                            tile = Some(alloc_tile(ops.tile_words)?);
                        }
                        let t = tile.as_deref_mut().expect("allocated above");
                        (ops.set_pixel)(t, lx, ly, &Pixel15::from_rgba8(px8));
                    }
                }
                Ok((flat, tile))
            })
            .collect();

        for (idx, tile) in results? {
            store.slots[idx] = tile;
        }
        Ok(store)
    }

    /// Flatten to a flat 8-bit RGBA image.  Absent tiles stay fully
    /// transparent.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        for ty in 0..self.tiles_h {
            for tx in 0..self.tiles_w {
                let idx = ty as usize * self.tiles_w as usize + tx as usize;
                let Some(tile) = self.slots[idx].as_deref() else { continue };
                let (gx0, gy0) = self.tile_origin(tx, ty);
                for ly in 0..TILE_SIZE {
                    let gy = gy0 + ly as i32;
                    if gy < 0 || gy >= self.height as i32 {
                        continue;
                    }
                    for lx in 0..TILE_SIZE {
                        let gx = gx0 + lx as i32;
                        if gx < 0 || gx >= self.width as i32 {
                            continue;
                        }
                        let px = (self.ops.get_pixel)(tile, lx, ly, self.fallback);
                        out.put_pixel(gx as u32, gy as u32, px.to_rgba8());
                    }
                }
            }
        }
        out
    }
}

/// Source-over in 15-bit fixed point, rounding at the midpoint.
fn source_over(src: &Pixel15, dst: &Pixel15) -> Pixel15 {
    let one = FIX15_ONE as i32;
    let sa = src.a as i32;
    let da = dst.a as i32;
    let dst_weight = (da * (one - sa)) >> 15;
    let na = sa + dst_weight;
    if na == 0 {
        return Pixel15::TRANSPARENT;
    }
    let ch = |s: u16, d: u16| -> u16 {
        ((s as i32 * sa + d as i32 * dst_weight + na / 2) / na) as u16
    };
    Pixel15 {
        r: ch(src.r, dst.r),
        g: ch(src.g, dst.g),
        b: ch(src.b, dst.b),
        a: na as u16,
    }
}
