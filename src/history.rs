//! Undo journal: an ordered list of reversible operations over a
//! [`TileStore`], split by a movable cursor into an undo-side prefix and
//! a redo-side suffix.  There is no separate redo list — redo items are
//! ordinary items past the cursor.
//!
//! Items hold compressed pre-edit snapshots.  The matching redo (or undo)
//! counterpart is synthesized lazily from the live store at the moment
//! `undo()`/`redo()` runs, so each item is stored once, not twice.
//!
//! Storage policy: items live in memory until the cumulative payload size
//! crosses the configured budget; from then on every new item is written
//! to an append-only spill file regardless of its size.  Eviction at the
//! item cap removes the oldest undo-side items first and can never touch
//! the redo side (recording truncates the redo suffix before anything is
//! evicted).
//!
//! Failure policy: if applying a snapshot fails mid-restore, the history
//! can no longer reconstruct a consistent timeline — the entire journal
//! is cleared and the canvas keeps whatever the partial restore produced.
//! Clearing history but keeping the canvas is deliberate; rolling the
//! canvas back would require a second shadow snapshot for no
//! user-visible benefit.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pixel::ColorType;
use crate::rle;
use crate::spill::{SpillFile, SpillRange};
use crate::tiles::{PixelRect, TileRect, TileStore};
use crate::{log_err, log_warn};

/// Kind tag of the built-in tile-region snapshot operation.
pub const KIND_TILE_REGION: u8 = 1;

/// Per-tile payload flags.
const TILE_ABSENT: u8 = 0;
const TILE_RAW: u8 = 1;
const TILE_RLE: u8 = 2;

/// Which way an item is being applied through history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

/// Journal limits.  The item cap bounds how far back the user can go;
/// the memory budget decides when payloads start spilling to disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub max_items: usize,
    pub memory_budget: usize,
    /// Spill directory; the system temp directory when `None`.
    pub spill_dir: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_items: 50,
            memory_budget: 100 * 1024 * 1024,
            spill_dir: None,
        }
    }
}

enum Storage {
    Mem(Vec<u8>),
    Spilled(SpillRange),
}

/// One reversible unit of edit history.
pub struct UndoItem {
    pub kind: u8,
    pub flags: u8,
    /// Small metadata fields interpreted by the operation kind (the
    /// tile-region kind stores the tile-rect origin and size).
    pub vals: [i32; 5],
    storage: Storage,
}

impl UndoItem {
    pub fn new(kind: u8, vals: [i32; 5], payload: Vec<u8>) -> Self {
        Self { kind, flags: 0, vals, storage: Storage::Mem(payload) }
    }

    fn mem_len(&self) -> usize {
        match &self.storage {
            Storage::Mem(p) => p.len(),
            Storage::Spilled(_) => 0,
        }
    }
}

/// A captured-but-not-yet-recorded snapshot.  Dropping it (a cancelled
/// operation) records nothing — the journal never holds a
/// partially-applied edit.
pub struct PendingSnapshot {
    item: UndoItem,
}

/// The seam between the generic journal and concrete edit kinds.
/// Implemented by brush/fill/transform code for its own kinds; the
/// tile-region snapshot handler is built in.
pub trait OperationHandler {
    /// Build the item that reverses `item`, reading the live store
    /// (called before `apply`, while the store still shows the state
    /// `item` is about to destroy).
    fn capture_reverse(
        &self,
        item: &UndoItem,
        store: &TileStore,
        direction: Direction,
    ) -> Result<UndoItem>;

    /// Apply the stored payload to the live store.
    fn apply(
        &self,
        item: &UndoItem,
        payload: &[u8],
        store: &mut TileStore,
        direction: Direction,
    ) -> Result<()>;
}

pub struct UndoJournal {
    items: VecDeque<UndoItem>,
    /// Number of undo-side items; `items[cursor - 1]` is the most
    /// recently applied edit.
    cursor: usize,
    cfg: HistoryConfig,
    /// Cumulative bytes of in-memory payloads.
    mem_bytes: usize,
    spill: Option<SpillFile>,
    handlers: Vec<(u8, Arc<dyn OperationHandler + Send + Sync>)>,
}

impl UndoJournal {
    pub fn new(cfg: HistoryConfig) -> Self {
        let mut journal = Self {
            items: VecDeque::new(),
            cursor: 0,
            cfg,
            mem_bytes: 0,
            spill: None,
            handlers: Vec::new(),
        };
        journal.register_handler(KIND_TILE_REGION, Arc::new(TileRegionHandler));
        journal
    }

    /// Register the handler for an operation kind.  Re-registering a
    /// kind replaces the old handler.
    pub fn register_handler(&mut self, kind: u8, handler: Arc<dyn OperationHandler + Send + Sync>) {
        self.handlers.retain(|(k, _)| *k != kind);
        self.handlers.push((kind, handler));
    }

    fn handler_for(&self, kind: u8) -> Option<Arc<dyn OperationHandler + Send + Sync>> {
        self.handlers.iter().find(|(k, _)| *k == kind).map(|(_, h)| Arc::clone(h))
    }

    // ---- introspection ------------------------------------------------------

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.items.len()
    }

    pub fn undo_count(&self) -> usize {
        self.cursor
    }

    pub fn redo_count(&self) -> usize {
        self.items.len() - self.cursor
    }

    /// In-memory payload bytes currently held (O(1) via cached total).
    pub fn memory_usage(&self) -> usize {
        self.mem_bytes
    }

    /// Drop the whole history and its spill file.
    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = 0;
        self.mem_bytes = 0;
        self.spill = None;
    }

    // ---- capture / record ---------------------------------------------------

    /// Snapshot the tiles a pixel-region edit is about to touch.  Call
    /// before mutating the store; `record` the result once the edit
    /// completes, or drop it if the edit is cancelled.
    pub fn capture_tiles(&self, store: &TileStore, region: &PixelRect) -> Result<PendingSnapshot> {
        let rect = store.tile_rect_for_pixels(region);
        let payload = encode_tile_region(store, &rect)?;
        let vals = [rect.tx as i32, rect.ty as i32, rect.tw as i32, rect.th as i32, 0];
        Ok(PendingSnapshot { item: UndoItem::new(KIND_TILE_REGION, vals, payload) })
    }

    /// Record a completed edit.
    pub fn record(&mut self, snapshot: PendingSnapshot) {
        self.record_item(snapshot.item);
    }

    /// Record an item of any registered kind.  Truncates the abandoned
    /// redo branch, evicts the oldest items at the cap, then appends.
    pub fn record_item(&mut self, mut item: UndoItem) {
        while self.items.len() > self.cursor {
            let dropped = self.items.pop_back().expect("redo suffix non-empty");
            self.mem_bytes = self.mem_bytes.saturating_sub(dropped.mem_len());
        }
        let cap = self.cfg.max_items.max(1);
        while self.items.len() >= cap {
            let dropped = self.items.pop_front().expect("at capacity");
            self.mem_bytes = self.mem_bytes.saturating_sub(dropped.mem_len());
        }
        self.route_storage(&mut item);
        self.items.push_back(item);
        self.cursor = self.items.len();
    }

    /// Memory-vs-spill routing.  Once the cumulative in-memory size is
    /// over budget, every new payload goes to the spill file.  A spill
    /// write failure falls back to memory with a warning rather than
    /// losing the item.
    fn route_storage(&mut self, item: &mut UndoItem) {
        let payload_len = item.mem_len();
        if payload_len > 0 && self.mem_bytes + payload_len > self.cfg.memory_budget {
            if self.spill.is_none() {
                match SpillFile::create_in(self.cfg.spill_dir.as_deref()) {
                    Ok(f) => self.spill = Some(f),
                    Err(e) => log_warn!("cannot create undo spill file: {}", e),
                }
            }
            if let (Some(spill), Storage::Mem(payload)) = (self.spill.as_mut(), &item.storage) {
                match spill.append(item.kind, item.flags, payload) {
                    Ok(range) => {
                        item.storage = Storage::Spilled(range);
                        return;
                    }
                    Err(e) => log_warn!("undo spill write failed, keeping in memory: {}", e),
                }
            }
        }
        self.mem_bytes += payload_len;
    }

    fn load_payload(&mut self, idx: usize) -> Result<Vec<u8>> {
        match &self.items[idx].storage {
            Storage::Mem(p) => Ok(p.clone()),
            Storage::Spilled(range) => {
                let range = *range;
                let spill = self
                    .spill
                    .as_mut()
                    .ok_or(Error::CorruptUndoData { expected: range.len as usize, got: 0 })?;
                spill.read(range)
            }
        }
    }

    // ---- undo / redo --------------------------------------------------------

    /// Step back one item.  `Ok(false)` when there is nothing to undo.
    /// On an application failure the whole journal is cleared (the
    /// history is unrecoverable) and the error is returned; the canvas
    /// keeps whatever the partial restore produced.
    pub fn undo(&mut self, store: &mut TileStore) -> Result<bool> {
        if self.cursor == 0 {
            return Ok(false);
        }
        self.step(store, self.cursor - 1, Direction::Undo)?;
        Ok(true)
    }

    /// Step forward one item.  `Ok(false)` when there is nothing to redo.
    pub fn redo(&mut self, store: &mut TileStore) -> Result<bool> {
        if self.cursor >= self.items.len() {
            return Ok(false);
        }
        self.step(store, self.cursor, Direction::Redo)?;
        Ok(true)
    }

    /// Shared undo/redo machinery.  `idx` is the item being applied.
    /// The synthesized inverse lands exactly where the applied item was
    /// (insert-after + remove-current collapses to an in-place swap) and
    /// the cursor moves over it.
    fn step(&mut self, store: &mut TileStore, idx: usize, direction: Direction) -> Result<()> {
        let kind = self.items[idx].kind;
        let Some(handler) = self.handler_for(kind) else {
            // An item we cannot interpret means the history is broken.
            log_err!("undo item has unregistered kind {}; clearing history", kind);
            self.clear();
            return Err(Error::CorruptUndoData { expected: kind as usize, got: 0 });
        };

        // (a) Synthesize the inverse from the live store.  The store has
        // not been touched yet, so a failure here leaves history intact.
        let reverse_dir = match direction {
            Direction::Undo => Direction::Redo,
            Direction::Redo => Direction::Undo,
        };
        let mut reverse = handler.capture_reverse(&self.items[idx], store, reverse_dir)?;

        // (b) Apply the stored snapshot.  From here on, failure poisons
        // the whole journal.
        let payload = match self.load_payload(idx) {
            Ok(p) => p,
            Err(e) => {
                log_err!("undo payload unreadable: {}; clearing history", e);
                self.clear();
                return Err(e);
            }
        };
        if let Err(e) = handler.apply(&self.items[idx], &payload, store, direction) {
            log_err!("history restore failed: {}; clearing history", e);
            self.clear();
            return Err(e);
        }

        // (c) Swap the inverse into the applied item's place and move the
        // cursor over it.
        self.mem_bytes = self.mem_bytes.saturating_sub(self.items[idx].mem_len());
        self.route_storage(&mut reverse);
        self.items[idx] = reverse;
        self.cursor = match direction {
            Direction::Undo => idx,
            Direction::Redo => idx + 1,
        };
        Ok(())
    }
}

// ---- built-in tile-region snapshots --------------------------------------

fn tile_rect_from_vals(vals: &[i32; 5]) -> TileRect {
    TileRect {
        tx: vals[0].max(0) as u32,
        ty: vals[1].max(0) as u32,
        tw: vals[2].max(0) as u32,
        th: vals[3].max(0) as u32,
    }
}

/// Serialize the current content of a tile rect: one flag byte per tile
/// (absent / raw / compressed), then the payload for present tiles.
/// Compression is the word coder for the 16-bit layouts and the byte
/// coder for mask tiles; tiles the coder cannot shrink are stored raw.
fn encode_tile_region(store: &TileStore, rect: &TileRect) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for ty in rect.ty..rect.ty + rect.th {
        for tx in rect.tx..rect.tx + rect.tw {
            match store.tile_serialized(tx, ty) {
                None => {
                    out.try_reserve(1).map_err(|_| Error::OutOfMemory)?;
                    out.push(TILE_ABSENT);
                }
                Some(raw) => {
                    out.try_reserve(raw.len() + 5).map_err(|_| Error::OutOfMemory)?;
                    let mut enc = vec![0u8; raw.len()];
                    let encoded = if store.color_type() == ColorType::Mask {
                        rle::encode8(&mut enc, &raw)
                    } else {
                        rle::encode16(&mut enc, &raw)
                    };
                    match encoded {
                        Some(size) => {
                            out.push(TILE_RLE);
                            out.extend_from_slice(&(size as u32).to_le_bytes());
                            out.extend_from_slice(&enc[..size]);
                        }
                        None => {
                            out.push(TILE_RAW);
                            out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
                            out.extend_from_slice(&raw);
                        }
                    }
                }
            }
        }
    }
    Ok(out)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn corrupt(&self) -> Error {
        Error::CorruptUndoData { expected: self.buf.len(), got: self.pos }
    }

    fn u8(&mut self) -> Result<u8> {
        let v = *self.buf.get(self.pos).ok_or_else(|| self.corrupt())?;
        self.pos += 1;
        Ok(v)
    }

    fn u32(&mut self) -> Result<u32> {
        let end = self.pos + 4;
        let bytes = self.buf.get(self.pos..end).ok_or_else(|| self.corrupt())?;
        self.pos = end;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let buf: &'a [u8] = self.buf;
        let end = self.pos + len;
        let v = buf.get(self.pos..end).ok_or_else(|| self.corrupt())?;
        self.pos = end;
        Ok(v)
    }

    fn finished(&self) -> bool {
        self.pos == self.buf.len()
    }
}

struct TileRegionHandler;

impl OperationHandler for TileRegionHandler {
    fn capture_reverse(
        &self,
        item: &UndoItem,
        store: &TileStore,
        _direction: Direction,
    ) -> Result<UndoItem> {
        let rect = tile_rect_from_vals(&item.vals);
        let payload = encode_tile_region(store, &rect)?;
        Ok(UndoItem::new(KIND_TILE_REGION, item.vals, payload))
    }

    fn apply(
        &self,
        item: &UndoItem,
        payload: &[u8],
        store: &mut TileStore,
        _direction: Direction,
    ) -> Result<()> {
        let rect = tile_rect_from_vals(&item.vals);
        let tile_bytes = store.color_type().tile_bytes();
        let mut r = Reader { buf: payload, pos: 0 };
        for ty in rect.ty..rect.ty + rect.th {
            for tx in rect.tx..rect.tx + rect.tw {
                match r.u8()? {
                    TILE_ABSENT => store.clear_tile(tx, ty),
                    TILE_RAW => {
                        let len = r.u32()? as usize;
                        if len != tile_bytes {
                            return Err(Error::CorruptUndoData { expected: tile_bytes, got: len });
                        }
                        let bytes = r.bytes(len)?;
                        store.set_tile_serialized(tx, ty, bytes)?;
                    }
                    TILE_RLE => {
                        let len = r.u32()? as usize;
                        let enc = r.bytes(len)?;
                        let mut raw = vec![0u8; tile_bytes];
                        if store.color_type() == ColorType::Mask {
                            rle::decode8(&mut raw, enc)?;
                        } else {
                            rle::decode16(&mut raw, enc)?;
                        }
                        store.set_tile_serialized(tx, ty, &raw)?;
                    }
                    other => {
                        return Err(Error::CorruptUndoData {
                            expected: TILE_RLE as usize,
                            got: other as usize,
                        });
                    }
                }
            }
        }
        if !r.finished() {
            return Err(r.corrupt());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{Pixel15, FIX15_ONE};
    use crate::tiles::WritePolicy;

    fn store_128() -> TileStore {
        TileStore::new(ColorType::Full, 128, 128).unwrap()
    }

    /// Canonical content plus tile presence, for bit-exact comparisons.
    fn state(store: &TileStore) -> (Vec<Pixel15>, Vec<bool>) {
        let mut pixels = Vec::new();
        for y in 0..store.height() as i32 {
            for x in 0..store.width() as i32 {
                pixels.push(store.get_pixel(x, y));
            }
        }
        let (tw, th) = store.grid_size();
        let mut present = Vec::new();
        for ty in 0..th {
            for tx in 0..tw {
                present.push(store.tile_present(tx, ty));
            }
        }
        (pixels, present)
    }

    fn paint_dot(store: &mut TileStore, journal: &mut UndoJournal, x: i32, y: i32, v: u16) {
        let region = PixelRect::new(x, y, 1, 1);
        let snap = journal.capture_tiles(store, &region).unwrap();
        store.set_pixel(x, y, &Pixel15::rgb(v, v, v), WritePolicy::Replace).unwrap();
        journal.record(snap);
    }

    #[test]
    fn nothing_to_undo_or_redo_is_a_no_op() {
        let mut store = store_128();
        let mut journal = UndoJournal::new(HistoryConfig::default());
        assert!(!journal.undo(&mut store).unwrap());
        assert!(!journal.redo(&mut store).unwrap());
    }

    #[test]
    fn capture_mutate_restore_is_bit_exact() {
        let mut store = store_128();
        let mut journal = UndoJournal::new(HistoryConfig::default());
        store.set_pixel(10, 10, &Pixel15::rgb(0x1111, 0x2222, 0x3333), WritePolicy::Replace).unwrap();
        let before = state(&store);

        let region = PixelRect::new(0, 0, 128, 128);
        let snap = journal.capture_tiles(&store, &region).unwrap();
        // Mutate: overwrite one pixel, add a tile, clear another.
        store.set_pixel(10, 10, &Pixel15::rgb(9, 9, 9), WritePolicy::Replace).unwrap();
        store.set_pixel(100, 100, &Pixel15::rgb(5, 5, 5), WritePolicy::Replace).unwrap();
        journal.record(snap);

        assert!(journal.undo(&mut store).unwrap());
        assert_eq!(state(&store), before);
    }

    #[test]
    fn restore_frees_tiles_that_were_absent_before() {
        let mut store = store_128();
        let mut journal = UndoJournal::new(HistoryConfig::default());
        let region = PixelRect::new(64, 64, 64, 64);
        let snap = journal.capture_tiles(&store, &region).unwrap();
        store.set_pixel(70, 70, &Pixel15::rgb(1, 1, 1), WritePolicy::Replace).unwrap();
        journal.record(snap);
        assert_eq!(store.tile_count(), 1);

        assert!(journal.undo(&mut store).unwrap());
        assert_eq!(store.tile_count(), 0, "restored tile must be freed, not zeroed");
    }

    #[test]
    fn undo_all_then_redo_all_is_bit_exact() {
        let mut store = store_128();
        let mut journal = UndoJournal::new(HistoryConfig::default());

        let mut checkpoints = vec![state(&store)];
        let spots = [(0, 0), (70, 5), (20, 90), (127, 127), (70, 5)];
        for (i, &(x, y)) in spots.iter().enumerate() {
            paint_dot(&mut store, &mut journal, x, y, (i as u16 + 1) * 1000);
            checkpoints.push(state(&store));
        }

        for i in (0..spots.len()).rev() {
            assert!(journal.undo(&mut store).unwrap());
            assert_eq!(state(&store), checkpoints[i], "undo to checkpoint {}", i);
        }
        assert!(!journal.undo(&mut store).unwrap());

        for i in 0..spots.len() {
            assert!(journal.redo(&mut store).unwrap());
            assert_eq!(state(&store), checkpoints[i + 1], "redo to checkpoint {}", i + 1);
        }
        assert!(!journal.redo(&mut store).unwrap());
    }

    #[test]
    fn new_edit_truncates_the_redo_branch() {
        let mut store = store_128();
        let mut journal = UndoJournal::new(HistoryConfig::default());
        paint_dot(&mut store, &mut journal, 0, 0, 100);
        paint_dot(&mut store, &mut journal, 1, 0, 200);
        assert!(journal.undo(&mut store).unwrap());
        assert_eq!(journal.redo_count(), 1);

        paint_dot(&mut store, &mut journal, 2, 0, 300);
        assert_eq!(journal.redo_count(), 0, "redo branch must be discarded");
        assert!(!journal.redo(&mut store).unwrap());
        // The new timeline still undoes cleanly.
        assert!(journal.undo(&mut store).unwrap());
        assert_eq!(store.get_pixel(2, 0).a, 0);
        assert_eq!(store.get_pixel(0, 0).r, 100);
    }

    #[test]
    fn capacity_evicts_oldest_undo_items_first() {
        let mut store = store_128();
        let cfg = HistoryConfig { max_items: 3, ..Default::default() };
        let mut journal = UndoJournal::new(cfg);

        let mut checkpoints = vec![state(&store)];
        for i in 0..5 {
            paint_dot(&mut store, &mut journal, i, 0, (i as u16 + 1) * 100);
            checkpoints.push(state(&store));
        }
        // Two oldest items were evicted; exactly three undos remain.
        assert_eq!(journal.undo_count(), 3);
        for i in (2..5).rev() {
            assert!(journal.undo(&mut store).unwrap());
            assert_eq!(state(&store), checkpoints[i]);
        }
        assert!(!journal.undo(&mut store).unwrap(), "evicted history is gone");
        // The redo side survived eviction untouched.
        assert_eq!(journal.redo_count(), 3);
        for i in 3..6 {
            assert!(journal.redo(&mut store).unwrap());
            assert_eq!(state(&store), checkpoints[i]);
        }
    }

    #[test]
    fn dropping_a_pending_snapshot_records_nothing() {
        let mut store = store_128();
        let mut journal = UndoJournal::new(HistoryConfig::default());
        let snap = journal.capture_tiles(&store, &PixelRect::new(0, 0, 10, 10)).unwrap();
        store.set_pixel(0, 0, &Pixel15::rgb(1, 1, 1), WritePolicy::Replace).unwrap();
        drop(snap); // cancelled operation
        assert!(!journal.can_undo());
    }

    #[test]
    fn over_budget_items_spill_and_still_restore() {
        let mut store = store_128();
        let cfg = HistoryConfig { memory_budget: 0, ..Default::default() };
        let mut journal = UndoJournal::new(cfg);

        let mut checkpoints = vec![state(&store)];
        for i in 0..3 {
            paint_dot(&mut store, &mut journal, i * 40, 0, (i as u16 + 1) * 500);
            checkpoints.push(state(&store));
        }
        assert_eq!(journal.memory_usage(), 0, "all payloads must be on disk");

        for i in (0..3).rev() {
            assert!(journal.undo(&mut store).unwrap());
            assert_eq!(state(&store), checkpoints[i]);
        }
        for i in 0..3 {
            assert!(journal.redo(&mut store).unwrap());
            assert_eq!(state(&store), checkpoints[i + 1]);
        }
    }

    #[test]
    fn corrupt_item_clears_journal_but_keeps_canvas() {
        let mut store = store_128();
        let mut journal = UndoJournal::new(HistoryConfig::default());
        store.set_pixel(0, 0, &Pixel15::rgb(7, 7, 7), WritePolicy::Replace).unwrap();

        // A tile-region item whose payload is garbage.
        let vals = [0, 0, 2, 2, 0];
        journal.record_item(UndoItem::new(KIND_TILE_REGION, vals, vec![9, 9, 9]));
        assert!(journal.can_undo());

        let err = journal.undo(&mut store).unwrap_err();
        assert!(matches!(err, Error::CorruptUndoData { .. }));
        // History is gone, canvas is not.
        assert!(!journal.can_undo());
        assert!(!journal.can_redo());
        assert_eq!(store.get_pixel(0, 0).r, 7);
        // The journal keeps working after the reset.
        paint_dot(&mut store, &mut journal, 1, 1, 42);
        assert!(journal.undo(&mut store).unwrap());
    }

    #[test]
    fn custom_handler_kinds_round_trip() {
        /// Sets the store's fallback color; payload is the RGB triple.
        struct FallbackHandler;

        impl OperationHandler for FallbackHandler {
            fn capture_reverse(
                &self,
                item: &UndoItem,
                store: &TileStore,
                _direction: Direction,
            ) -> Result<UndoItem> {
                let fb = store.fallback_color();
                let mut payload = Vec::new();
                for ch in fb {
                    payload.extend_from_slice(&ch.to_le_bytes());
                }
                Ok(UndoItem::new(item.kind, item.vals, payload))
            }

            fn apply(
                &self,
                _item: &UndoItem,
                payload: &[u8],
                store: &mut TileStore,
                _direction: Direction,
            ) -> Result<()> {
                if payload.len() != 6 {
                    return Err(Error::CorruptUndoData { expected: 6, got: payload.len() });
                }
                let ch = |i: usize| u16::from_le_bytes([payload[i], payload[i + 1]]);
                store.set_fallback_color([ch(0), ch(2), ch(4)]);
                Ok(())
            }
        }

        const KIND_FALLBACK: u8 = 9;
        let mut store = store_128();
        let mut journal = UndoJournal::new(HistoryConfig::default());
        journal.register_handler(KIND_FALLBACK, Arc::new(FallbackHandler));

        // Record the old fallback, then change it.
        let old = store.fallback_color();
        let mut payload = Vec::new();
        for ch in old {
            payload.extend_from_slice(&ch.to_le_bytes());
        }
        journal.record_item(UndoItem::new(KIND_FALLBACK, [0; 5], payload));
        store.set_fallback_color([1, 2, 3]);

        assert!(journal.undo(&mut store).unwrap());
        assert_eq!(store.fallback_color(), old);
        assert!(journal.redo(&mut store).unwrap());
        assert_eq!(store.fallback_color(), [1, 2, 3]);
    }

    #[test]
    fn snapshots_compress_transparent_regions() {
        let store = store_128();
        let journal = UndoJournal::new(HistoryConfig::default());
        let snap = journal.capture_tiles(&store, &PixelRect::new(0, 0, 128, 128)).unwrap();
        // Four absent tiles: one flag byte each.
        assert_eq!(snap.item.vals[2], 2);
        assert_eq!(snap.item.vals[3], 2);
        assert_eq!(snap.item.mem_len(), 4);

        let mut store = store_128();
        store
            .set_pixel(0, 0, &Pixel15 { r: 1, g: 2, b: 3, a: FIX15_ONE }, WritePolicy::Replace)
            .unwrap();
        let snap = journal.capture_tiles(&store, &PixelRect::new(0, 0, 128, 128)).unwrap();
        // A nearly-empty tile must compress far below its 32 KiB raw form.
        assert!(snap.item.mem_len() < 1024, "got {} bytes", snap.item.mem_len());
    }
}
