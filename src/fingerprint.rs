//! Content fingerprint of a recorded tape.
//!
//! The fingerprint digests every track's identity-independent metadata in
//! canonical order, in a fixed wire form: byte strings are length-prefixed
//! (u32 little-endian), integers are little-endian, the kind is its ustar
//! typeflag byte. Two snapshots with equal fingerprints describe the same
//! byte stream; storage layout never enters the digest.

use std::fmt;

use md5::{Digest, Md5};

use crate::entry::Entry;
use crate::error::{Result, TapeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut text = String::with_capacity(32);
        for b in self.0 {
            text.push_str(&format!("{b:02x}"));
        }
        text
    }

    pub fn from_hex(text: &str) -> Result<Fingerprint> {
        if text.len() != 32 || !text.is_ascii() {
            return Err(TapeError::SnapshotCorrupt(format!(
                "malformed fingerprint: {text}"
            )));
        }
        let mut bytes = [0u8; 16];
        for (i, out) in bytes.iter_mut().enumerate() {
            *out = u8::from_str_radix(&text[2 * i..2 * i + 2], 16).map_err(|_| {
                TapeError::SnapshotCorrupt(format!("malformed fingerprint: {text}"))
            })?;
        }
        Ok(Fingerprint(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental fingerprint computation. Tracks must be fed in canonical
/// (byte-lexicographic `arc_path`) order.
pub struct FingerprintBuilder {
    hasher: Md5,
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        FingerprintBuilder { hasher: Md5::new() }
    }

    pub fn add_track(
        &mut self,
        arc_path: &str,
        type_flag: u8,
        size: u64,
        mode: u32,
        mtime: i64,
        link_target: Option<&str>,
    ) {
        self.push_bytes(arc_path.as_bytes());
        self.hasher.update([type_flag]);
        self.hasher.update(size.to_le_bytes());
        self.hasher.update(mode.to_le_bytes());
        self.hasher.update(mtime.to_le_bytes());
        self.push_bytes(link_target.unwrap_or("").as_bytes());
    }

    /// A track whose source can no longer be read. Feeds a marker that can
    /// never collide with a real track, so verification fails loudly.
    pub fn add_missing(&mut self, arc_path: &str) {
        self.push_bytes(arc_path.as_bytes());
        self.hasher.update([b'!']);
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.hasher.finalize().into())
    }

    fn push_bytes(&mut self, data: &[u8]) {
        self.hasher.update((data.len() as u32).to_le_bytes());
        self.hasher.update(data);
    }
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        FingerprintBuilder::new()
    }
}

/// Fingerprint of an ordered run of tracks.
pub fn of_entries<'a, I>(entries: I) -> Fingerprint
where
    I: IntoIterator<Item = &'a Entry>,
{
    let mut builder = FingerprintBuilder::new();
    for entry in entries {
        builder.add_track(
            &entry.arc_path,
            entry.kind.type_flag(),
            entry.size,
            entry.mode,
            entry.mtime,
            entry.link_target.as_deref(),
        );
    }
    builder.finish()
}

#[cfg(test)]
mod test_fingerprint {
    use super::*;
    use crate::entry::EntryKind;

    fn track(arc_path: &str, size: u64, mtime: i64) -> Entry {
        Entry {
            arc_path: arc_path.to_string(),
            kind: EntryKind::File,
            size,
            mode: 0o644,
            mtime,
            link_target: None,
            start_offset: 0,
        }
    }

    #[test]
    fn stable_across_recomputation() {
        let entries = vec![track("a", 10, 100), track("b", 20, 200)];
        assert_eq!(of_entries(&entries), of_entries(&entries));
    }

    #[test]
    fn any_field_changes_the_fingerprint() {
        let base = vec![track("a", 10, 100)];
        let bigger = vec![track("a", 11, 100)];
        let touched = vec![track("a", 10, 101)];
        let renamed = vec![track("b", 10, 100)];
        assert_ne!(of_entries(&base), of_entries(&bigger));
        assert_ne!(of_entries(&base), of_entries(&touched));
        assert_ne!(of_entries(&base), of_entries(&renamed));
    }

    #[test]
    fn start_offset_is_not_part_of_the_digest() {
        let mut moved = track("a", 10, 100);
        moved.start_offset = 4096;
        assert_eq!(of_entries([&track("a", 10, 100)]), of_entries([&moved]));
    }

    #[test]
    fn length_prefixing_keeps_field_boundaries() {
        // Same concatenated text, different field split.
        let ab = vec![track("ab", 0, 0), track("c", 0, 0)];
        let a = vec![track("a", 0, 0), track("bc", 0, 0)];
        assert_ne!(of_entries(&ab), of_entries(&a));
    }

    #[test]
    fn missing_marker_diverges_from_every_real_track() {
        let mut present = FingerprintBuilder::new();
        present.add_track("a", b'0', 0, 0o644, 0, None);
        let mut missing = FingerprintBuilder::new();
        missing.add_missing("a");
        assert_ne!(present.finish(), missing.finish());
    }

    #[test]
    fn hex_round_trip() {
        let fp = of_entries([&track("a", 1, 2)]);
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(Fingerprint::from_hex(&hex).unwrap(), fp);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(Fingerprint::from_hex("abc").is_err());
        assert!(Fingerprint::from_hex(&"zz".repeat(16)).is_err());
    }
}
