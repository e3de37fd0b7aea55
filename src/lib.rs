//! rasterkit — the core raster engine of a tile-based paint application.
//!
//! A sparse, tile-based image store ([`TileStore`]) over four pixel
//! encodings, the per-color-type codec behind it, a read-only compositor
//! with a closed blend-mode table, a run-length diff codec, and an undo
//! journal ([`UndoJournal`]) that captures and restores edits as
//! compressed byte-level tile diffs.
//!
//! Everything user-facing — widgets, brush synthesis, fills, interchange
//! file formats, layer trees — lives in the host application and talks to
//! this crate through [`TileStore`]'s pixel/tile primitives, the
//! [`history::OperationHandler`] seam, and the 8-bit
//! [`image::RgbaImage`] boundary.
//!
//! ```
//! use rasterkit::{ColorType, Pixel15, TileStore, WritePolicy};
//! use rasterkit::{HistoryConfig, PixelRect, UndoJournal};
//!
//! let mut store = TileStore::new(ColorType::Full, 256, 256)?;
//! let mut journal = UndoJournal::new(HistoryConfig::default());
//!
//! let stroke_area = PixelRect::new(10, 10, 40, 40);
//! let snapshot = journal.capture_tiles(&store, &stroke_area)?;
//! store.set_pixel(20, 20, &Pixel15::rgb(0x8000, 0, 0), WritePolicy::Blend)?;
//! journal.record(snapshot);
//!
//! journal.undo(&mut store)?;
//! assert_eq!(store.get_pixel(20, 20).a, 0);
//! # Ok::<(), rasterkit::Error>(())
//! ```

pub mod blend;
pub mod codec;
pub mod composite;
pub mod error;
pub mod history;
pub mod logger;
pub mod pixel;
pub mod progress;
pub mod rle;
pub mod spill;
pub mod tiles;

pub use blend::BlendMode;
pub use composite::{RenderBuffer, TexturePattern, OPACITY_MAX};
pub use error::{Error, Result};
pub use history::{Direction, HistoryConfig, PendingSnapshot, UndoItem, UndoJournal};
pub use pixel::{ColorType, Pixel15, FIX15_ONE, TILE_SIZE};
pub use progress::ProgressState;
pub use tiles::{PixelRect, TileRect, TileStore, WritePolicy};
