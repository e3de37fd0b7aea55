//! Append-only scratch file for over-budget undo payloads.
//!
//! Each record is a small bincode header (payload length, kind, flags)
//! followed by the payload bytes.  The journal remembers the offset a
//! record was written at and reads it back by that offset; nothing is
//! ever rewritten in place.  The file is private to one journal and is
//! deleted when the journal drops it.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Serialize, Deserialize)]
struct RecordHeader {
    len: u32,
    kind: u8,
    flags: u8,
}

/// Location of one spilled payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpillRange {
    pub offset: u64,
    pub len: u32,
}

pub struct SpillFile {
    file: File,
    path: PathBuf,
    write_off: u64,
}

impl SpillFile {
    /// Create a fresh scratch file in `dir` (the system temp directory
    /// when `None`).  The name is unique per process and per journal.
    pub fn create_in(dir: Option<&Path>) -> Result<Self> {
        let dir = dir.map(PathBuf::from).unwrap_or_else(std::env::temp_dir);
        let id = NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("rasterkit-undo-{}-{}.spill", std::process::id(), id));
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok(Self { file, path, write_off: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far (headers included).
    pub fn size(&self) -> u64 {
        self.write_off
    }

    /// Append one record, returning where it landed.
    pub fn append(&mut self, kind: u8, flags: u8, payload: &[u8]) -> Result<SpillRange> {
        let header = RecordHeader { len: payload.len() as u32, kind, flags };
        let offset = self.write_off;
        self.file.seek(SeekFrom::Start(offset))?;
        let header_bytes =
            bincode::serialize(&header).map_err(|e| Error::Io(std::io::Error::other(e)))?;
        self.file.write_all(&header_bytes)?;
        self.file.write_all(payload)?;
        self.write_off = offset + header_bytes.len() as u64 + payload.len() as u64;
        Ok(SpillRange { offset, len: payload.len() as u32 })
    }

    /// Read a record back.  The stored length must match the range, or
    /// the journal's bookkeeping no longer matches the file.
    pub fn read(&mut self, range: SpillRange) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(range.offset))?;
        let header: RecordHeader = bincode::deserialize_from(&mut self.file)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        if header.len != range.len {
            return Err(Error::CorruptUndoData {
                expected: range.len as usize,
                got: header.len as usize,
            });
        }
        let mut payload = vec![0u8; header.len as usize];
        self.file.read_exact(&mut payload)?;
        Ok(payload)
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        // Scratch data is session-private; best effort removal.
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back_by_offset() {
        let mut spill = SpillFile::create_in(None).unwrap();
        let a = spill.append(1, 0, b"first payload").unwrap();
        let b = spill.append(1, 2, b"second, longer payload bytes").unwrap();
        assert!(b.offset > a.offset);
        assert_eq!(spill.read(a).unwrap(), b"first payload");
        assert_eq!(spill.read(b).unwrap(), b"second, longer payload bytes");
        // Reads are repeatable.
        assert_eq!(spill.read(a).unwrap(), b"first payload");
    }

    #[test]
    fn length_mismatch_is_corrupt() {
        let mut spill = SpillFile::create_in(None).unwrap();
        let r = spill.append(1, 0, b"payload").unwrap();
        let bad = SpillRange { offset: r.offset, len: r.len + 1 };
        assert!(matches!(spill.read(bad), Err(Error::CorruptUndoData { .. })));
    }

    #[test]
    fn file_is_deleted_on_drop() {
        let spill = SpillFile::create_in(None).unwrap();
        let path = spill.path().to_path_buf();
        assert!(path.exists());
        drop(spill);
        assert!(!path.exists());
    }
}
