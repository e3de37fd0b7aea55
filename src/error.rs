use thiserror::Error;

/// Crate-wide error type.
///
/// "Nothing to undo" / "nothing to redo" are not errors — the journal
/// reports them as `Ok(false)` so callers can treat them as user-facing
/// no-ops without matching on a variant.
#[derive(Debug, Error)]
pub enum Error {
    /// A tile, slot-array or undo-buffer allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The undo spill file could not be written or read back.
    #[error("spill file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored undo payload did not decode to the expected size.
    /// Should never occur in a closed system, but is checked, not assumed.
    #[error("corrupt undo data: expected {expected} bytes, got {got}")]
    CorruptUndoData { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn display_reports_sizes() {
        let err = Error::CorruptUndoData { expected: 32768, got: 100 };
        let msg = err.to_string();
        assert!(msg.contains("32768") && msg.contains("100"));
    }
}
