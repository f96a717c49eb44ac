//! Deterministic, resumable ustar tape streaming.
//!
//! A tape is a directory tree frozen into a byte-exact USTAR
//! (POSIX.1-1988) stream. Recording walks the tree once at T0 and commits a
//! snapshot — every track's metadata plus its precomputed stream offset —
//! into SQLite under `<root>/.tartape/`. Playback at T1 re-reads the
//! snapshot and reproduces the stream bit for bit, verifying each source
//! against its T0 promise and failing fast on any divergence.
//!
//! # Stream layout
//!
//! Tracks appear in byte-lexicographic archive-path order, each one a
//! 512-byte header followed by its payload rounded up to the block size:
//!
//! | Length       | Region  | Description |
//! | -----------: | ------- | ----------- |
//! | 512          | header  | ustar header, GNU base-256 size past 8 GiB |
//! | size         | body    | file payload, regular files only |
//! | pad          | padding | zeros to the next 512-byte edge |
//!
//! The stream ends with 1024 zero bytes. Offsets are planned at recording
//! time from sizes alone, so any absolute stream offset maps back to a
//! `(track, region)` pair without touching the source tree — that mapping
//! is what makes resumption exact: for any `k`, `play(k)` emits precisely
//! the bytes `play(0)` would have emitted from `k` on.
//!
//! # Identity
//!
//! Headers are anonymized: uid and gid are written as zero and the names as
//! `root`, so a tape never leaks the recording account. Overrides in
//! [`TapeOptions`] substitute a fixed identity instead.
//!
//! ```no_run
//! use tartape::{Event, Tape, TapePlayer, TapeRecorder};
//!
//! # fn main() -> tartape::Result<()> {
//! let fingerprint = TapeRecorder::new("/data/photos")?.commit()?;
//!
//! let tape = Tape::discover("/data/photos")?;
//! assert_eq!(tape.fingerprint(), fingerprint);
//! let player = TapePlayer::new(&tape, "/data/photos");
//! for event in player.play(0)? {
//!     if let Event::FileData { bytes } = event? {
//!         let _ = bytes; // ship them
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod buf;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod offsets;
pub mod player;
pub mod recorder;
pub mod sql;
pub mod tape;
pub mod ustar;
pub mod walk;

pub use entry::{Entry, EntryKind, TapeOptions};
pub use error::{Result, TapeError};
pub use fingerprint::Fingerprint;
pub use offsets::Region;
pub use player::{Event, EventStream, TapePlayer};
pub use recorder::TapeRecorder;
pub use tape::Tape;

/// The ustar block size; headers are one block, payloads are rounded up to
/// whole blocks.
pub const BLOCK_SIZE: u64 = 512;

/// Two zero blocks close every stream.
pub const TERMINATOR_SIZE: u64 = 1024;

/// Default read size for file bodies.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Metadata directory kept at the tape root, never part of the stream.
pub const TAPE_DIR: &str = ".tartape";

/// Snapshot database file inside [`TAPE_DIR`].
pub const TAPE_INDEX_NAME: &str = "index.db";
