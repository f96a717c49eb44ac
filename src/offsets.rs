//! Stream offset arithmetic.
//!
//! Every track occupies `512 + payload_blocks * 512` bytes; the stream ends
//! with a 1024-byte block of zeros. Offsets are planned once, from sizes and
//! kinds alone, so the whole layout is known before a single byte is read.

use crate::entry::Entry;
use crate::{BLOCK_SIZE, TERMINATOR_SIZE};

/// Which part of the stream a byte offset falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Header,
    Body,
    Padding,
    Terminator,
}

/// Assign `start_offset` to every track, in order. Returns the total stream
/// length, terminator included.
pub fn plan(entries: &mut [Entry]) -> u64 {
    let mut offset = 0u64;
    for entry in entries.iter_mut() {
        entry.start_offset = offset;
        offset = entry.end_offset();
    }
    offset + TERMINATOR_SIZE
}

/// Classify an offset relative to a track's header start. `local` must be
/// below the track's occupied length. The returned offset is relative to the
/// start of the region.
pub fn region_of(entry: &Entry, local: u64) -> (Region, u64) {
    if local < BLOCK_SIZE {
        (Region::Header, local)
    } else if local < BLOCK_SIZE + entry.size {
        (Region::Body, local - BLOCK_SIZE)
    } else {
        (Region::Padding, local - BLOCK_SIZE - entry.size)
    }
}

/// Intersect a resume position with a block of the stream. Returns how far
/// into the block emission starts and how many bytes are still due; `(0, 0)`
/// when the block lies entirely before the resume position.
pub fn window(skip: u64, block_start: u64, block_len: u64) -> (u64, u64) {
    if skip >= block_start + block_len {
        return (0, 0);
    }
    let local = skip.saturating_sub(block_start);
    (local, block_len - local)
}
