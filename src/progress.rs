//! Shared progress/cancel state for long-running store operations.
//!
//! The engine is single-writer: only one thread mutates a store at a time,
//! while a UI thread may poll for progress or request cancellation.  One
//! mutex guards both the cancel flag and the counters; sweeps poll it
//! between tiles, so a cancelled operation always stops at a tile
//! boundary and leaves the store structurally valid.

use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    cancel: bool,
    done: u32,
    total: u32,
}

/// Cloneable handle; all clones share the same state.
#[derive(Clone, Default)]
pub struct ProgressState {
    inner: Arc<Mutex<Inner>>,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset counters for a new operation of `total` steps.
    pub fn begin(&self, total: u32) {
        if let Ok(mut s) = self.inner.lock() {
            s.cancel = false;
            s.done = 0;
            s.total = total;
        }
    }

    pub fn advance(&self, steps: u32) {
        if let Ok(mut s) = self.inner.lock() {
            s.done = s.done.saturating_add(steps).min(s.total);
        }
    }

    /// Completed fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f32 {
        match self.inner.lock() {
            Ok(s) if s.total > 0 => s.done as f32 / s.total as f32,
            _ => 0.0,
        }
    }

    pub fn request_cancel(&self) {
        if let Ok(mut s) = self.inner.lock() {
            s.cancel = true;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().map(|s| s.cancel).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancel_state() {
        let p = ProgressState::new();
        let q = p.clone();
        assert!(!p.is_cancelled());
        q.request_cancel();
        assert!(p.is_cancelled());
        p.begin(10);
        assert!(!p.is_cancelled());
    }

    #[test]
    fn fraction_tracks_advance() {
        let p = ProgressState::new();
        p.begin(4);
        assert_eq!(p.fraction(), 0.0);
        p.advance(1);
        assert_eq!(p.fraction(), 0.25);
        p.advance(10);
        assert_eq!(p.fraction(), 1.0);
    }
}
