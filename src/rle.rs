//! Run-length diff codec for undo snapshots.
//!
//! Paint-editing diffs are dominated by long transparent runs interrupted
//! by short opaque edits, so the coder alternates *literal* runs (a length
//! byte followed by that many raw units) with *repeat* runs (a length byte
//! meaning "repeat the previous emitted unit that many times"), starting
//! with a literal.  Zero-length runs are legal and chain segments longer
//! than 255 units.
//!
//! Two unit widths: bytes (`encode8`/`decode8`) for 1-bit mask tiles, and
//! 2-byte words (`encode16`/`decode16`) for the wide channels of the other
//! color types, where meaningful repeats occur at word granularity.
//!
//! The encoder never produces output that is not strictly smaller than the
//! input: the moment the output would reach the input size it reports
//! failure (`None`) and the caller stores the raw bytes instead.

use crate::error::{Error, Result};

/// Repeat runs shorter than this stay in the literal segment; a length
/// byte only pays for itself from two extra copies up.
const MIN_REPEAT: usize = 2;

/// Encode `src` into `dst` at byte granularity.  Returns the encoded size,
/// or `None` if the encoding would not be smaller than `src`.
/// `dst` must be at least `src.len()` bytes.
pub fn encode8(dst: &mut [u8], src: &[u8]) -> Option<usize> {
    encode_units::<1>(dst, src)
}

/// Inverse of [`encode8`].  `dst.len()` is the expected decoded size;
/// any mismatch is reported as [`Error::CorruptUndoData`], never as
/// silently wrong output.
pub fn decode8(dst: &mut [u8], src: &[u8]) -> Result<()> {
    decode_units::<1>(dst, src)
}

/// [`encode8`] at 16-bit-word granularity.  `src.len()` must be even.
pub fn encode16(dst: &mut [u8], src: &[u8]) -> Option<usize> {
    debug_assert_eq!(src.len() % 2, 0);
    encode_units::<2>(dst, src)
}

/// Inverse of [`encode16`].
pub fn decode16(dst: &mut [u8], src: &[u8]) -> Result<()> {
    debug_assert_eq!(dst.len() % 2, 0);
    decode_units::<2>(dst, src)
}

#[inline]
fn unit_eq<const W: usize>(src: &[u8], a: usize, b: usize) -> bool {
    src[a * W..a * W + W] == src[b * W..b * W + W]
}

fn encode_units<const W: usize>(dst: &mut [u8], src: &[u8]) -> Option<usize> {
    let n = src.len() / W;
    if n == 0 {
        return None;
    }
    debug_assert!(dst.len() >= src.len());
    let limit = src.len(); // output must stay strictly below this
    let mut out = 0usize;
    let mut pos = 0usize; // unit index
    let mut prev: Option<usize> = None; // unit index of the last emitted unit

    macro_rules! emit {
        ($bytes:expr) => {{
            let b: &[u8] = $bytes;
            if out + b.len() >= limit {
                return None;
            }
            dst[out..out + b.len()].copy_from_slice(b);
            out += b.len();
        }};
    }

    while pos < n {
        // Literal segment: units up to and including the anchor of the
        // next worthwhile repeat run.
        let lit_start = pos;
        while pos < n && pos - lit_start < 255 {
            // Probe the run starting here; three equal units anchor a repeat.
            let mut run = 1usize;
            while run <= MIN_REPEAT && pos + run < n && unit_eq::<W>(src, pos + run, pos) {
                run += 1;
            }
            // A unit equal to the previous emitted one extends a repeat
            // directly, without re-entering the literal.
            if pos == lit_start {
                if let Some(p) = prev {
                    if unit_eq::<W>(src, pos, p) {
                        break;
                    }
                }
            }
            pos += 1;
            if run > MIN_REPEAT {
                break;
            }
        }
        let lit_len = pos - lit_start;
        emit!(&[lit_len as u8]);
        emit!(&src[lit_start * W..pos * W]);
        if lit_len > 0 {
            prev = Some(pos - 1);
        }
        if pos >= n {
            break;
        }

        // Repeat segment: copies of the previous emitted unit.
        let mut rep = 0usize;
        if let Some(p) = prev {
            while pos < n && rep < 255 && unit_eq::<W>(src, pos, p) {
                pos += 1;
                rep += 1;
            }
        }
        emit!(&[rep as u8]);
    }
    Some(out)
}

fn decode_units<const W: usize>(dst: &mut [u8], src: &[u8]) -> Result<()> {
    let n = dst.len() / W;
    let expected = dst.len();
    let corrupt = move |got: usize| Error::CorruptUndoData { expected, got };
    let mut out = 0usize; // unit index
    let mut ip = 0usize; // byte index into src

    while out < n {
        // Literal run.
        let lit = *src.get(ip).ok_or_else(|| corrupt(out * W))? as usize;
        ip += 1;
        if out + lit > n || ip + lit * W > src.len() {
            return Err(corrupt((out + lit) * W));
        }
        dst[out * W..(out + lit) * W].copy_from_slice(&src[ip..ip + lit * W]);
        ip += lit * W;
        out += lit;
        if out >= n {
            break;
        }

        // Repeat run.
        let rep = *src.get(ip).ok_or_else(|| corrupt(out * W))? as usize;
        ip += 1;
        if rep > 0 {
            if out == 0 || out + rep > n {
                return Err(corrupt((out + rep) * W));
            }
            let (head, tail) = dst.split_at_mut(out * W);
            let unit = &head[(out - 1) * W..];
            for chunk in tail[..rep * W].chunks_exact_mut(W) {
                chunk.copy_from_slice(&unit[..W]);
            }
            out += rep;
        }
    }
    if out != n || ip != src.len() {
        return Err(corrupt(out * W));
    }
    Ok(())
}
