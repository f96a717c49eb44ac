//! Tape recording.
//!
//! A recording is one pass over the source tree at T0: scan, order, plan,
//! fingerprint, persist. Once `commit` returns, the snapshot is immutable
//! and the stream it describes is fully determined.

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::entry::TapeOptions;
use crate::error::Result;
use crate::fingerprint::{self, Fingerprint};
use crate::offsets;
use crate::sql::SnapshotWriter;
use crate::walk;
use crate::TAPE_DIR;

pub struct TapeRecorder {
    root: PathBuf,
    options: TapeOptions,
}

impl TapeRecorder {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        TapeRecorder::with_options(root, TapeOptions::default())
    }

    pub fn with_options<P: AsRef<Path>>(root: P, options: TapeOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !std::fs::symlink_metadata(&root)?.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("tape root must be a directory: {}", root.display()),
            )
            .into());
        }
        Ok(TapeRecorder { root, options })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Take the T0 inventory and persist it under `<root>/.tartape/`.
    pub fn commit(&self) -> Result<Fingerprint> {
        let scan = walk::scan_root(&self.root, &self.options)?;

        let mut entries = scan.entries;
        // Canonical order: archive path bytes, nothing else.
        entries.sort_unstable_by(|a, b| a.arc_path.as_bytes().cmp(b.arc_path.as_bytes()));
        let total_size = offsets::plan(&mut entries);
        let fingerprint = fingerprint::of_entries(&entries);

        info!(
            "recording tape: {} tracks, {} bytes, fingerprint {}",
            entries.len(),
            total_size,
            fingerprint
        );

        let mut writer = SnapshotWriter::create(&self.root.join(TAPE_DIR))?;
        writer.begin()?;
        for entry in &entries {
            debug!("track {} at {}", entry.arc_path, entry.start_offset);
            writer.append(entry)?;
        }
        writer.commit(&fingerprint, total_size, scan.root_mtime)?;

        Ok(fingerprint)
    }
}
