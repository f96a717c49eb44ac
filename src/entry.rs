use std::path::{Path, PathBuf};

use crate::{BLOCK_SIZE, DEFAULT_CHUNK_SIZE};

/// What a track points at on disk. Everything else (sockets, fifos,
/// devices) is filtered out before a track is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

impl EntryKind {
    /// The ustar typeflag byte for this kind.
    pub fn type_flag(self) -> u8 {
        match self {
            EntryKind::File => b'0',
            EntryKind::Symlink => b'2',
            EntryKind::Dir => b'5',
        }
    }
}

/// One recorded track of the tape: a file, directory, or symlink together
/// with the metadata promised at recording time and its planned position in
/// the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Archive path, `/`-separated, relative to the tape root. Directories
    /// carry a trailing `/`.
    pub arc_path: String,
    pub kind: EntryKind,
    /// Payload bytes. Zero for directories and symlinks.
    pub size: u64,
    /// Low 12 mode bits (permissions plus set-id and sticky). Ownership is
    /// not recorded.
    pub mode: u32,
    /// Whole Unix seconds.
    pub mtime: i64,
    /// Symlink target, verbatim. `None` for every other kind.
    pub link_target: Option<String>,
    /// Absolute stream offset of this track's 512-byte header.
    pub start_offset: u64,
}

impl Entry {
    /// Number of 512-byte blocks the payload occupies.
    pub fn payload_blocks(&self) -> u64 {
        match self.kind {
            EntryKind::File => self.size.div_ceil(BLOCK_SIZE),
            _ => 0,
        }
    }

    /// Zero bytes between the end of the payload and the next block edge.
    pub fn padding_len(&self) -> u64 {
        self.payload_blocks() * BLOCK_SIZE - self.size
    }

    /// Stream offset of the first payload byte.
    pub fn body_start(&self) -> u64 {
        self.start_offset + BLOCK_SIZE
    }

    /// Stream offset one past this track's padding.
    pub fn end_offset(&self) -> u64 {
        self.body_start() + self.payload_blocks() * BLOCK_SIZE
    }

    /// Where this track lives on disk, given the tape root.
    pub fn source_path(&self, root: &Path) -> PathBuf {
        root.join(self.arc_path.trim_end_matches('/'))
    }
}

/// Playback and recording knobs. The defaults reproduce the reference
/// behavior: 64 KiB reads, lenient filtering, anonymized identity.
#[derive(Debug, Clone)]
pub struct TapeOptions {
    /// Read size for file bodies.
    pub chunk_size: usize,
    /// Error out on sockets/fifos/devices instead of skipping them.
    pub strict_unsupported: bool,
    /// Glob patterns excluded from recording, relative to the root.
    pub excludes: Vec<String>,
    /// Identity overrides. `None` keeps the anonymized 0/0/root/root.
    pub override_uid: Option<u32>,
    pub override_gid: Option<u32>,
    pub override_uname: Option<String>,
    pub override_gname: Option<String>,
}

impl Default for TapeOptions {
    fn default() -> Self {
        TapeOptions {
            chunk_size: DEFAULT_CHUNK_SIZE,
            strict_unsupported: false,
            excludes: Vec::new(),
            override_uid: None,
            override_gid: None,
            override_uname: None,
            override_gname: None,
        }
    }
}

#[cfg(test)]
mod test_entry {
    use super::*;

    fn file(size: u64) -> Entry {
        Entry {
            arc_path: "a".to_string(),
            kind: EntryKind::File,
            size,
            mode: 0o644,
            mtime: 0,
            link_target: None,
            start_offset: 0,
        }
    }

    #[test]
    fn payload_blocks_round_up() {
        assert_eq!(file(0).payload_blocks(), 0);
        assert_eq!(file(1).payload_blocks(), 1);
        assert_eq!(file(512).payload_blocks(), 1);
        assert_eq!(file(513).payload_blocks(), 2);
    }

    #[test]
    fn directories_have_no_payload() {
        let dir = Entry {
            arc_path: "d/".to_string(),
            kind: EntryKind::Dir,
            size: 0,
            mode: 0o755,
            mtime: 0,
            link_target: None,
            start_offset: 1024,
        };
        assert_eq!(dir.payload_blocks(), 0);
        assert_eq!(dir.end_offset(), 1024 + 512);
    }

    #[test]
    fn padding_completes_the_block() {
        assert_eq!(file(0).padding_len(), 0);
        assert_eq!(file(1).padding_len(), 511);
        assert_eq!(file(512).padding_len(), 0);
        assert_eq!(file(1000).padding_len(), 24);
    }

    #[test]
    fn source_path_strips_directory_slash() {
        let dir = Entry {
            arc_path: "d/e/".to_string(),
            kind: EntryKind::Dir,
            size: 0,
            mode: 0o755,
            mtime: 0,
            link_target: None,
            start_offset: 0,
        };
        assert_eq!(
            dir.source_path(Path::new("/tape")),
            PathBuf::from("/tape/d/e")
        );
    }
}
