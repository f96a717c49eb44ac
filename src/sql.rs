//! SQLite-backed snapshot store.
//!
//! A recording stages its database in a `NamedTempFile` inside the tape's
//! metadata directory and renames it over `index.db` on commit, so a crash
//! mid-recording leaves nothing a player could open. Players open the
//! committed database read-only and never write.

use std::path::{Path, PathBuf};

use log::debug;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tempfile::NamedTempFile;

use crate::entry::{Entry, EntryKind};
use crate::error::{Result, TapeError};
use crate::fingerprint::Fingerprint;
use crate::offsets::{region_of, Region};
use crate::{TAPE_INDEX_NAME, TERMINATOR_SIZE};

const SNAPSHOT_VERSION: &str = "1";

const SCHEMA: &str = "
    CREATE TABLE tracks (
        seq          INTEGER PRIMARY KEY,
        arc_path     TEXT NOT NULL UNIQUE,
        kind         INTEGER NOT NULL,
        size         INTEGER NOT NULL,
        mode         INTEGER NOT NULL,
        mtime        INTEGER NOT NULL,
        link_target  TEXT,
        start_offset INTEGER NOT NULL
    );
    CREATE TABLE tape_meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

fn kind_code(kind: EntryKind) -> i64 {
    match kind {
        EntryKind::File => 0,
        EntryKind::Dir => 1,
        EntryKind::Symlink => 2,
    }
}

fn kind_from_code(code: i64) -> Result<EntryKind> {
    match code {
        0 => Ok(EntryKind::File),
        1 => Ok(EntryKind::Dir),
        2 => Ok(EntryKind::Symlink),
        other => Err(TapeError::SnapshotCorrupt(format!(
            "unknown track kind {other}"
        ))),
    }
}

type TrackRow = (String, i64, i64, i64, i64, Option<String>, i64);

fn entry_from_row(row: TrackRow) -> Result<Entry> {
    let (arc_path, kind, size, mode, mtime, link_target, start_offset) = row;
    let narrow = |value: i64, what: &str| {
        u64::try_from(value)
            .map_err(|_| TapeError::SnapshotCorrupt(format!("negative {what}: {value}")))
    };
    Ok(Entry {
        kind: kind_from_code(kind)?,
        size: narrow(size, "size")?,
        mode: u32::try_from(mode)
            .map_err(|_| TapeError::SnapshotCorrupt(format!("mode out of range: {mode}")))?,
        mtime,
        link_target,
        start_offset: narrow(start_offset, "start offset")?,
        arc_path,
    })
}

/// Append-only writer for one recording. Dropped without `commit`, the
/// staged database disappears with its tempfile.
pub struct SnapshotWriter {
    // Field order matters on drop: the connection must close before the
    // staged tempfile is unlinked.
    conn: Connection,
    staged: NamedTempFile,
    target: PathBuf,
    next_seq: u64,
}

impl SnapshotWriter {
    /// Stage a fresh snapshot database inside `tape_dir` (created if
    /// needed), to be committed as `index.db`.
    pub fn create(tape_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(tape_dir)?;
        let staged = NamedTempFile::new_in(tape_dir)?;
        let conn = Connection::open(staged.path())?;
        conn.execute_batch(SCHEMA)?;
        debug!("staged snapshot at {}", staged.path().display());
        Ok(SnapshotWriter {
            conn,
            target: tape_dir.join(TAPE_INDEX_NAME),
            next_seq: 0,
            staged,
        })
    }

    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    /// Append the next track. Tracks arrive in canonical order with their
    /// offsets already planned.
    pub fn append(&mut self, entry: &Entry) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO tracks
             (seq, arc_path, kind, size, mode, mtime, link_target, start_offset)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        stmt.execute(params![
            self.next_seq as i64,
            entry.arc_path,
            kind_code(entry.kind),
            entry.size as i64,
            i64::from(entry.mode),
            entry.mtime,
            entry.link_target,
            entry.start_offset as i64,
        ])?;
        self.next_seq += 1;
        Ok(())
    }

    /// Seal the recording and atomically publish it.
    pub fn commit(self, fingerprint: &Fingerprint, total_size: u64, root_mtime: i64) -> Result<()> {
        {
            let mut stmt = self
                .conn
                .prepare_cached("INSERT INTO tape_meta (key, value) VALUES (?, ?)")?;
            stmt.execute(params!["version", SNAPSHOT_VERSION])?;
            stmt.execute(params!["fingerprint", fingerprint.to_hex()])?;
            stmt.execute(params!["total_size", total_size.to_string()])?;
            stmt.execute(params!["root_mtime", root_mtime.to_string()])?;
        }
        self.conn.execute_batch("COMMIT")?;
        self.conn.close().map_err(|(_, err)| err)?;
        self.staged.persist(&self.target).map_err(|err| err.error)?;
        debug!("snapshot committed");
        Ok(())
    }
}

/// Read-only view of a committed snapshot.
pub struct Snapshot {
    conn: Connection,
    count: u64,
    total_size: u64,
    fingerprint: Fingerprint,
    root_mtime: i64,
}

impl Snapshot {
    /// Open and validate a committed snapshot. Any structural surprise is
    /// reported as corruption rather than carried into playback.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let version = meta(&conn, "version")?;
        if version != SNAPSHOT_VERSION {
            return Err(TapeError::SnapshotCorrupt(format!(
                "unsupported snapshot version {version}"
            )));
        }
        let fingerprint = Fingerprint::from_hex(&meta(&conn, "fingerprint")?)?;
        let total_size = parse_meta(&conn, "total_size")?;
        let root_mtime = parse_meta(&conn, "root_mtime")?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;

        let snapshot = Snapshot {
            conn,
            count: count as u64,
            total_size,
            fingerprint,
            root_mtime,
        };
        snapshot.check_consistency()?;
        Ok(snapshot)
    }

    // One ordered scan proving the snapshot describes a well-formed stream:
    // contiguous sequence numbers, strictly increasing archive paths, and
    // gap-free offsets that add up to the recorded total.
    fn check_consistency(&self) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT arc_path, kind, size, mode, mtime, link_target, start_offset, seq
             FROM tracks ORDER BY seq",
        )?;
        let mut rows = stmt.query([])?;

        let mut expected_seq = 0i64;
        let mut offset = 0u64;
        let mut previous: Option<String> = None;
        while let Some(row) = rows.next()? {
            let seq: i64 = row.get(7)?;
            let entry = entry_from_row((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))?;
            if seq != expected_seq {
                return Err(TapeError::SnapshotCorrupt(format!(
                    "track sequence gap at {expected_seq}"
                )));
            }
            if entry.start_offset != offset {
                return Err(TapeError::SnapshotCorrupt(format!(
                    "track {seq} starts at {} instead of {offset}",
                    entry.start_offset
                )));
            }
            if let Some(prev) = &previous {
                if prev.as_bytes() >= entry.arc_path.as_bytes() {
                    return Err(TapeError::SnapshotCorrupt(format!(
                        "track order broken at {}",
                        entry.arc_path
                    )));
                }
            }
            offset = entry.end_offset();
            previous = Some(entry.arc_path);
            expected_seq += 1;
        }

        if offset + TERMINATOR_SIZE != self.total_size {
            return Err(TapeError::SnapshotCorrupt(format!(
                "tracks span {offset} bytes but the tape claims {}",
                self.total_size
            )));
        }
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Stream offset where the 1024-byte terminator begins.
    pub fn body_end(&self) -> u64 {
        self.total_size - TERMINATOR_SIZE
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn root_mtime(&self) -> i64 {
        self.root_mtime
    }

    pub fn get(&self, index: u64) -> Result<Entry> {
        let row = self
            .conn
            .prepare_cached(
                "SELECT arc_path, kind, size, mode, mtime, link_target, start_offset
                 FROM tracks WHERE seq = ?",
            )?
            .query_row(params![index as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })
            .optional()?;
        match row {
            Some(row) => entry_from_row(row),
            None => Err(TapeError::SnapshotCorrupt(format!("no track {index}"))),
        }
    }

    /// Track index and entry for an archive path, if recorded.
    pub fn find_path(&self, arc_path: &str) -> Result<Option<(u64, Entry)>> {
        let row = self
            .conn
            .prepare_cached("SELECT seq FROM tracks WHERE arc_path = ?")?
            .query_row(params![arc_path], |row| row.get::<_, i64>(0))
            .optional()?;
        match row {
            Some(seq) => Ok(Some((seq as u64, self.get(seq as u64)?))),
            None => Ok(None),
        }
    }

    /// Map an absolute stream offset in `[0, total_size)` to its track and
    /// region. Offsets inside the terminator map to `(count, Terminator, _)`.
    pub fn locate(&self, offset: u64) -> Result<(u64, Region, u64)> {
        if offset >= self.total_size {
            return Err(TapeError::InvalidOffset {
                offset,
                len: self.total_size,
            });
        }
        if offset >= self.body_end() {
            return Ok((self.count, Region::Terminator, offset - self.body_end()));
        }
        let seq = self
            .conn
            .prepare_cached(
                "SELECT seq FROM tracks WHERE start_offset <= ?
                 ORDER BY start_offset DESC LIMIT 1",
            )?
            .query_row(params![offset as i64], |row| row.get::<_, i64>(0))
            .optional()?
            .ok_or_else(|| {
                TapeError::SnapshotCorrupt(format!("offset {offset} precedes every track"))
            })?;
        let entry = self.get(seq as u64)?;
        let (region, local) = region_of(&entry, offset - entry.start_offset);
        Ok((seq as u64, region, local))
    }

    /// Lazy run over the tracks starting at `index`.
    pub fn iter_from(&self, index: u64) -> SnapshotIter<'_> {
        SnapshotIter {
            snapshot: self,
            next: index,
        }
    }
}

pub struct SnapshotIter<'a> {
    snapshot: &'a Snapshot,
    next: u64,
}

impl Iterator for SnapshotIter<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.snapshot.count() {
            return None;
        }
        let item = self.snapshot.get(self.next);
        self.next += 1;
        Some(item)
    }
}

fn meta(conn: &Connection, key: &str) -> Result<String> {
    conn.prepare_cached("SELECT value FROM tape_meta WHERE key = ?")?
        .query_row(params![key], |row| row.get(0))
        .optional()?
        .ok_or_else(|| TapeError::SnapshotCorrupt(format!("missing metadata key {key}")))
}

fn parse_meta<T: std::str::FromStr>(conn: &Connection, key: &str) -> Result<T> {
    let text = meta(conn, key)?;
    text.parse()
        .map_err(|_| TapeError::SnapshotCorrupt(format!("malformed metadata {key}: {text}")))
}
