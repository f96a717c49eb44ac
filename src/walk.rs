//! Source tree scanning.
//!
//! Walks the tape root depth-first, classifies everything by `lstat`, and
//! turns the survivors into unplanned tracks. Only files, directories, and
//! symlinks are recordable; the tape's own `.tartape/` metadata directory is
//! never part of the stream, and path limits are enforced here so a
//! committed snapshot can always be encoded.

use std::ffi::OsStr;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use log::{debug, warn};

use crate::entry::{Entry, EntryKind, TapeOptions};
use crate::error::{Result, TapeError};
use crate::ustar;
use crate::TAPE_DIR;

// name + '/' + prefix is all a ustar header can carry.
const ARC_PATH_MAX: usize = 255;
// A directory's final component plus its trailing slash must fit the name
// field outright; no split can help it.
const DIR_NAME_MAX: usize = 100;
const LINK_TARGET_MAX: usize = 100;

/// Everything a recording needs from one pass over the source tree. The
/// entries are unordered and carry no offsets yet.
pub struct Scan {
    pub entries: Vec<Entry>,
    /// The root's own mtime. Recorded for reference only: committing a tape
    /// rewrites `.tartape/` inside the root, so its mtime is exempt from
    /// integrity checking.
    pub root_mtime: i64,
}

/// Scan `root` into candidate tracks.
pub fn scan_root(root: &Path, options: &TapeOptions) -> Result<Scan> {
    let root_meta = std::fs::symlink_metadata(root)?;
    if !root_meta.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("tape root must be a directory: {}", root.display()),
        )
        .into());
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a: &OsStr, b: &OsStr| a.cmp(b))
        .filter_entry(|candidate| {
            !(candidate.depth() == 1 && candidate.file_name() == OsStr::new(TAPE_DIR))
        });
    if !options.excludes.is_empty() {
        let mut overrides = OverrideBuilder::new(root);
        for pattern in &options.excludes {
            overrides.add(&format!("!{pattern}"))?;
        }
        builder.overrides(overrides.build()?);
    }

    let mut entries = Vec::new();
    for walked in builder.build() {
        let walked = match walked {
            Ok(walked) => walked,
            Err(err) => {
                warn!("skipping unreadable entry: {err}");
                continue;
            }
        };
        if walked.depth() == 0 {
            continue;
        }
        let path = walked.path();
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                warn!("skipping {}: {err}", path.display());
                continue;
            }
        };

        let rel = match path.strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let rel_text = rel
            .to_str()
            .ok_or_else(|| TapeError::NonUtf8Path(path.to_path_buf()))?;

        let file_type = meta.file_type();
        let (kind, size, link_target, arc_path) = if file_type.is_dir() {
            let arc_path = format!("{rel_text}/");
            let name = rel_text.rsplit('/').next().unwrap_or(rel_text);
            if name.len() + 1 > DIR_NAME_MAX {
                return Err(TapeError::DirectoryNameTooLong(arc_path));
            }
            (EntryKind::Dir, 0, None, arc_path)
        } else if file_type.is_file() {
            (EntryKind::File, meta.len(), None, rel_text.to_string())
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(path)?
                .into_os_string()
                .into_string()
                .map_err(|_| TapeError::NonUtf8Path(path.to_path_buf()))?;
            if target.len() > LINK_TARGET_MAX {
                return Err(TapeError::PathTooLong(target));
            }
            (EntryKind::Symlink, 0, Some(target), rel_text.to_string())
        } else {
            if options.strict_unsupported {
                return Err(TapeError::UnsupportedKind(path.display().to_string()));
            }
            debug!("skipping unsupported kind: {}", path.display());
            continue;
        };

        if arc_path.len() > ARC_PATH_MAX {
            return Err(TapeError::PathTooLong(arc_path));
        }
        // Prove the header can be built before anything is promised.
        ustar::split_arc_path(&arc_path)?;

        entries.push(Entry {
            arc_path,
            kind,
            size,
            mode: meta.mode() & 0o7777,
            mtime: meta.mtime(),
            link_target,
            start_offset: 0,
        });
    }

    Ok(Scan {
        entries,
        root_mtime: root_meta.mtime(),
    })
}
