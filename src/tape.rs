//! A committed tape and its metadata.

use std::path::Path;

use crate::entry::Entry;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::sql::Snapshot;
use crate::{TAPE_DIR, TAPE_INDEX_NAME};

/// Handle on a recorded tape. Loading validates the snapshot; afterwards
/// everything here is cheap metadata access.
pub struct Tape {
    snapshot: Snapshot,
}

impl Tape {
    /// Load the tape recorded under `<root>/.tartape/`.
    pub fn discover<P: AsRef<Path>>(root: P) -> Result<Tape> {
        let db = root.as_ref().join(TAPE_DIR).join(TAPE_INDEX_NAME);
        if !db.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no tape recorded under {}", root.as_ref().display()),
            )
            .into());
        }
        Ok(Tape {
            snapshot: Snapshot::open(&db)?,
        })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.snapshot.fingerprint()
    }

    /// Total byte length of the stream, terminator included.
    pub fn total_size(&self) -> u64 {
        self.snapshot.total_size()
    }

    pub fn count(&self) -> u64 {
        self.snapshot.count()
    }

    pub fn get(&self, index: u64) -> Result<Entry> {
        self.snapshot.get(index)
    }

    /// Stream offset of a track's header, if the path was recorded.
    pub fn offset_of(&self, arc_path: &str) -> Result<Option<u64>> {
        Ok(self
            .snapshot
            .find_path(arc_path)?
            .map(|(_, entry)| entry.start_offset))
    }

    pub(crate) fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}
