//! Tape playback.
//!
//! The player turns a committed snapshot back into the byte stream it
//! promised, as a pull-driven run of events. Before any event for a track is
//! emitted the source is re-`lstat`ed against the T0 promise; any divergence
//! is fatal and stops the stream where it stands. Resumption from an
//! arbitrary offset replays exactly the suffix of the full stream, at the
//! cost of the digest for a track whose body bytes were skipped.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use log::{info, warn};
use md5::{Digest, Md5};

use crate::buf::{fill_buf, Fill};
use crate::entry::{Entry, EntryKind, TapeOptions};
use crate::error::{Result, TapeError};
use crate::fingerprint::FingerprintBuilder;
use crate::offsets::window;
use crate::tape::Tape;
use crate::ustar::{self, Identity};
use crate::{BLOCK_SIZE, TERMINATOR_SIZE};

/// One step of the tape byte stream. Concatenating the `FileData` payloads
/// of a full playback yields the archive byte-for-byte.
#[derive(Debug)]
pub enum Event {
    FileStart {
        entry: Entry,
        start_offset: u64,
        /// True when playback entered this track somewhere past its header
        /// start; only ever set on the first track of a run.
        resumed: bool,
    },
    FileData {
        bytes: Vec<u8>,
    },
    FileEnd {
        entry: Entry,
        end_offset: u64,
        /// Digest of the payload region. `None` when body bytes were
        /// skipped by resumption, which makes the digest unrecoverable
        /// without re-reading from zero.
        md5: Option<[u8; 16]>,
    },
    TapeCompleted,
}

pub struct TapePlayer<'a> {
    tape: &'a Tape,
    source_root: PathBuf,
    options: TapeOptions,
    identity: Identity,
}

impl<'a> TapePlayer<'a> {
    pub fn new<P: AsRef<Path>>(tape: &'a Tape, source_root: P) -> Self {
        TapePlayer::with_options(tape, source_root, TapeOptions::default())
    }

    pub fn with_options<P: AsRef<Path>>(
        tape: &'a Tape,
        source_root: P,
        options: TapeOptions,
    ) -> Self {
        let identity = Identity::from_options(&options);
        TapePlayer {
            tape,
            source_root: source_root.as_ref().to_path_buf(),
            options,
            identity,
        }
    }

    /// Start the stream at `start_offset`. Offset `total_size` yields a
    /// bare `TapeCompleted`; anything past it is invalid.
    pub fn play(&self, start_offset: u64) -> Result<EventStream<'_>> {
        let snapshot = self.tape.snapshot();
        let len = snapshot.total_size();
        if start_offset > len {
            return Err(TapeError::InvalidOffset {
                offset: start_offset,
                len,
            });
        }

        let state = if start_offset == len {
            State::Completed
        } else {
            // locate() collapses terminator offsets to index == count, so a
            // single entry state covers every resume point.
            let (index, _, _) = snapshot.locate(start_offset)?;
            State::Enter { index }
        };

        info!(
            "playing tape from offset {start_offset} of {len} ({} tracks)",
            snapshot.count()
        );
        Ok(EventStream {
            player: self,
            skip: start_offset,
            count: snapshot.count(),
            body_end: snapshot.body_end(),
            state,
        })
    }

    /// Recompute the fingerprint from the live tree and compare it with the
    /// recorded one. Missing or unreadable tracks count as divergence.
    pub fn verify(&self) -> Result<bool> {
        let snapshot = self.tape.snapshot();
        let mut builder = FingerprintBuilder::new();
        for entry in snapshot.iter_from(0) {
            let entry = entry?;
            match self.observe(&entry) {
                Some((kind, size, mode, mtime, link_target)) => builder.add_track(
                    &entry.arc_path,
                    kind.type_flag(),
                    size,
                    mode,
                    mtime,
                    link_target.as_deref(),
                ),
                None => {
                    warn!("track no longer readable: {}", entry.arc_path);
                    builder.add_missing(&entry.arc_path);
                }
            }
        }
        Ok(builder.finish() == self.tape.fingerprint())
    }

    // Current on-disk shape of a track, in fingerprint terms.
    fn observe(&self, entry: &Entry) -> Option<(EntryKind, u64, u32, i64, Option<String>)> {
        let path = entry.source_path(&self.source_root);
        let meta = std::fs::symlink_metadata(&path).ok()?;
        let file_type = meta.file_type();
        let (kind, size, link_target) = if file_type.is_dir() {
            (EntryKind::Dir, 0, None)
        } else if file_type.is_file() {
            (EntryKind::File, meta.len(), None)
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&path).ok()?.into_os_string().into_string().ok()?;
            (EntryKind::Symlink, 0, Some(target))
        } else {
            return None;
        };
        Some((kind, size, meta.mode() & 0o7777, meta.mtime(), link_target))
    }
}

// Per-track playback context. The digest is armed only when the whole
// payload region lies at or after the resume point.
struct Current {
    index: u64,
    entry: Entry,
    digest: Option<Md5>,
    phase: Phase,
}

enum Phase {
    Start,
    Header,
    OpenBody,
    Body { file: File, remaining: u64 },
    Padding,
    End,
}

enum State {
    Enter { index: u64 },
    Playing(Box<Current>),
    Terminator { remaining: u64 },
    Completed,
    Done,
}

/// Lazy, single-pass event sequence. Fuses after the first error; dropping
/// it mid-track closes the open source file.
pub struct EventStream<'a> {
    player: &'a TapePlayer<'a>,
    skip: u64,
    count: u64,
    body_end: u64,
    state: State,
}

impl EventStream<'_> {
    fn step(&mut self) -> Result<Option<Event>> {
        loop {
            match std::mem::replace(&mut self.state, State::Done) {
                State::Enter { index } => {
                    if index >= self.count {
                        let (_, remaining) = window(self.skip, self.body_end, TERMINATOR_SIZE);
                        self.state = State::Terminator { remaining };
                        continue;
                    }
                    let entry = self.player.tape.snapshot().get(index)?;
                    self.check_integrity(&entry)?;
                    let digest = (self.skip <= entry.body_start()).then(Md5::new);
                    self.state = State::Playing(Box::new(Current {
                        index,
                        entry,
                        digest,
                        phase: Phase::Start,
                    }));
                }

                State::Playing(mut current) => match current.phase {
                    Phase::Start => {
                        let event = Event::FileStart {
                            entry: current.entry.clone(),
                            start_offset: current.entry.start_offset,
                            resumed: self.skip > current.entry.start_offset,
                        };
                        current.phase = Phase::Header;
                        self.state = State::Playing(current);
                        return Ok(Some(event));
                    }

                    Phase::Header => {
                        let (local, due) =
                            window(self.skip, current.entry.start_offset, BLOCK_SIZE);
                        current.phase = Phase::OpenBody;
                        if due > 0 {
                            let block = ustar::encode(&current.entry, &self.player.identity)?;
                            let bytes = block[local as usize..].to_vec();
                            self.state = State::Playing(current);
                            return Ok(Some(Event::FileData { bytes }));
                        }
                        self.state = State::Playing(current);
                    }

                    Phase::OpenBody => {
                        let (local, due) =
                            window(self.skip, current.entry.body_start(), current.entry.size);
                        if current.entry.kind == EntryKind::File && due > 0 {
                            let path = current.entry.source_path(&self.player.source_root);
                            let mut file = File::open(&path)?;
                            if local > 0 {
                                file.seek(SeekFrom::Start(local))?;
                            }
                            current.phase = Phase::Body {
                                file,
                                remaining: due,
                            };
                        } else {
                            current.phase = Phase::Padding;
                        }
                        self.state = State::Playing(current);
                    }

                    Phase::Body { mut file, remaining } => {
                        if remaining == 0 {
                            // The promised bytes are out; anything more
                            // means the file changed underneath us.
                            let mut probe = [0u8; 1];
                            if file.read(&mut probe)? != 0 {
                                return Err(TapeError::Integrity(format!(
                                    "file grew during playback: {}",
                                    current.entry.arc_path
                                )));
                            }
                            current.phase = Phase::Padding;
                            self.state = State::Playing(current);
                            continue;
                        }
                        let due = remaining.min(self.player.options.chunk_size as u64) as usize;
                        let mut bytes = vec![0u8; due];
                        if let Fill::Eof(_) = fill_buf(&mut file, &mut bytes)? {
                            return Err(TapeError::Integrity(format!(
                                "file shrank during playback: {}",
                                current.entry.arc_path
                            )));
                        }
                        if let Some(digest) = current.digest.as_mut() {
                            digest.update(&bytes);
                        }
                        current.phase = Phase::Body {
                            file,
                            remaining: remaining - due as u64,
                        };
                        self.state = State::Playing(current);
                        return Ok(Some(Event::FileData { bytes }));
                    }

                    Phase::Padding => {
                        let padding_start = current.entry.body_start() + current.entry.size;
                        let (_, due) =
                            window(self.skip, padding_start, current.entry.padding_len());
                        current.phase = Phase::End;
                        if due > 0 {
                            self.state = State::Playing(current);
                            return Ok(Some(Event::FileData {
                                bytes: vec![0u8; due as usize],
                            }));
                        }
                        self.state = State::Playing(current);
                    }

                    Phase::End => {
                        let md5 = current.digest.take().map(|digest| digest.finalize().into());
                        let event = Event::FileEnd {
                            end_offset: current.entry.end_offset(),
                            entry: current.entry,
                            md5,
                        };
                        self.state = State::Enter {
                            index: current.index + 1,
                        };
                        return Ok(Some(event));
                    }
                },

                State::Terminator { remaining } => {
                    self.state = State::Completed;
                    if remaining > 0 {
                        return Ok(Some(Event::FileData {
                            bytes: vec![0u8; remaining as usize],
                        }));
                    }
                }

                State::Completed => {
                    info!("tape stream completed");
                    return Ok(Some(Event::TapeCompleted));
                }

                State::Done => return Ok(None),
            }
        }
    }

    // The T1 gate: the source must still look exactly as promised at T0.
    fn check_integrity(&self, entry: &Entry) -> Result<()> {
        let path = entry.source_path(&self.player.source_root);
        let meta = std::fs::symlink_metadata(&path)?;
        let file_type = meta.file_type();
        match entry.kind {
            EntryKind::File => {
                if !file_type.is_file() {
                    return Err(diverged(entry, "no longer a regular file"));
                }
                if meta.len() != entry.size {
                    return Err(diverged(
                        entry,
                        &format!("size {} promised, {} found", entry.size, meta.len()),
                    ));
                }
                if meta.mtime() != entry.mtime {
                    return Err(diverged(entry, "mtime changed"));
                }
            }
            EntryKind::Dir => {
                if !file_type.is_dir() {
                    return Err(diverged(entry, "no longer a directory"));
                }
                if meta.mtime() != entry.mtime {
                    return Err(diverged(entry, "mtime changed"));
                }
            }
            EntryKind::Symlink => {
                if !file_type.is_symlink() {
                    return Err(diverged(entry, "no longer a symlink"));
                }
                let target = std::fs::read_link(&path)?;
                let promised = entry.link_target.as_deref().unwrap_or("");
                if target.as_os_str().as_bytes() != promised.as_bytes() {
                    return Err(diverged(entry, "link target changed"));
                }
            }
        }
        Ok(())
    }
}

fn diverged(entry: &Entry, what: &str) -> TapeError {
    warn!("integrity failure on {}: {what}", entry.arc_path);
    TapeError::Integrity(format!("{}: {what}", entry.arc_path))
}

impl Iterator for EventStream<'_> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => None,
            Err(err) => {
                // step() already parked the state at Done; the stream stays
                // fused after reporting the failure.
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod test_player {
    use super::*;
    use crate::recorder::TapeRecorder;
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn set_mtime(path: &Path, unix_seconds: u64) {
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(unix_seconds);
        let file = fs::File::options().write(true).open(path).or_else(|_| {
            // Directories need a read handle.
            fs::File::open(path)
        });
        file.unwrap().set_modified(stamp).unwrap();
    }

    fn record(root: &Path) -> Tape {
        TapeRecorder::new(root).unwrap().commit().unwrap();
        Tape::discover(root).unwrap()
    }

    fn collect(tape: &Tape, root: &Path, start: u64) -> (Vec<Event>, Vec<u8>) {
        let player = TapePlayer::new(tape, root);
        let events: Vec<Event> = player
            .play(start)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let mut bytes = Vec::new();
        for event in &events {
            if let Event::FileData { bytes: data } = event {
                bytes.extend_from_slice(data);
            }
        }
        (events, bytes)
    }

    fn md5_of(data: &[u8]) -> [u8; 16] {
        Md5::digest(data).into()
    }

    #[test]
    fn empty_directory_streams_header_plus_terminator() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("d")).unwrap();

        let tape = record(root.path());
        assert_eq!(tape.total_size(), 1536);

        let (events, bytes) = collect(&tape, root.path(), 0);
        assert_eq!(bytes.len(), 1536);
        assert_eq!(bytes[156], b'5');
        assert!(bytes[512..].iter().all(|b| *b == 0));
        assert!(matches!(events.last(), Some(Event::TapeCompleted)));
    }

    #[test]
    fn zero_byte_file_occupies_one_header_block() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("d")).unwrap();
        fs::write(root.path().join("d/empty"), b"").unwrap();

        let tape = record(root.path());
        let (events, bytes) = collect(&tape, root.path(), 0);
        assert_eq!(bytes.len(), 2048);

        // A fully played empty payload still digests.
        let end_md5 = events.iter().find_map(|event| match event {
            Event::FileEnd { entry, md5, .. } if entry.arc_path == "d/empty" => Some(*md5),
            _ => None,
        });
        assert_eq!(end_md5, Some(Some(md5_of(b""))));
    }

    #[test]
    fn one_byte_file_streams_and_digests() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("D")).unwrap();
        fs::write(root.path().join("D/a"), b"A").unwrap();

        let tape = record(root.path());
        let (events, bytes) = collect(&tape, root.path(), 0);
        assert_eq!(bytes.len(), 2560);
        // Dir header, file header, then the payload byte and its padding.
        assert_eq!(bytes[1024], 0x41);
        assert!(bytes[1025..1536].iter().all(|b| *b == 0));

        let end_md5 = events.iter().find_map(|event| match event {
            Event::FileEnd { entry, md5, .. } if entry.arc_path == "D/a" => Some(*md5),
            _ => None,
        });
        assert_eq!(end_md5, Some(Some(md5_of(b"A"))));
    }

    #[test]
    fn event_order_is_start_data_end_per_track() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), vec![7u8; 600]).unwrap();
        fs::write(root.path().join("b"), b"tail").unwrap();

        let tape = record(root.path());
        let (events, _) = collect(&tape, root.path(), 0);

        let shape: Vec<&str> = events
            .iter()
            .map(|event| match event {
                Event::FileStart { .. } => "start",
                Event::FileData { .. } => "data",
                Event::FileEnd { .. } => "end",
                Event::TapeCompleted => "completed",
            })
            .collect();
        assert_eq!(
            shape,
            [
                "start", "data", "data", "data", "end", // a: header, body, padding
                "start", "data", "data", "data", "end", // b
                "data", "completed"
            ]
        );
    }

    #[test]
    fn resumption_replays_the_exact_suffix_at_every_offset() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("d")).unwrap();
        fs::write(root.path().join("d/a"), vec![0xAB; 700]).unwrap();
        fs::write(root.path().join("d/b"), (0..=255u8).collect::<Vec<_>>()).unwrap();
        std::os::unix::fs::symlink("d/a", root.path().join("link")).unwrap();

        let tape = record(root.path());
        let (_, full) = collect(&tape, root.path(), 0);
        let len = tape.total_size();
        assert_eq!(full.len() as u64, len);

        for k in 0..=len {
            let (_, suffix) = collect(&tape, root.path(), k);
            assert_eq!(suffix, full[k as usize..], "resume at {k}");
        }
    }

    #[test]
    fn playback_is_byte_deterministic() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"same bytes").unwrap();

        let tape = record(root.path());
        let (_, first) = collect(&tape, root.path(), 0);
        let (_, second) = collect(&tape, root.path(), 0);
        assert_eq!(first, second);
    }

    #[test]
    fn identical_trees_share_a_fingerprint_and_stream() {
        let build = |root: &Path| {
            fs::create_dir(root.join("d")).unwrap();
            fs::write(root.join("d/a"), b"stable").unwrap();
            set_mtime(&root.join("d/a"), 1_000_000);
            set_mtime(&root.join("d"), 1_000_001);
        };
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        build(first.path());
        build(second.path());

        let tape_one = record(first.path());
        let tape_two = record(second.path());
        assert_eq!(tape_one.fingerprint(), tape_two.fingerprint());

        let (_, bytes_one) = collect(&tape_one, first.path(), 0);
        let (_, bytes_two) = collect(&tape_two, second.path(), 0);
        assert_eq!(bytes_one, bytes_two);
    }

    #[test]
    fn resume_inside_padding_skips_the_digest() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a.txt"), vec![1u8; 1000]).unwrap();
        fs::write(root.path().join("b.txt"), b"second").unwrap();

        let tape = record(root.path());
        // a.txt: header [0,512), body [512,1512), padding [1512,1536).
        let start = 1512 + 12;
        let player = TapePlayer::new(&tape, root.path());
        let events: Vec<Event> = player
            .play(start)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();

        match &events[0] {
            Event::FileStart { entry, resumed, .. } => {
                assert_eq!(entry.arc_path, "a.txt");
                assert!(resumed);
            }
            other => panic!("expected FileStart, got {other:?}"),
        }
        match &events[1] {
            Event::FileData { bytes } => assert_eq!(bytes, &vec![0u8; 12]),
            other => panic!("expected padding tail, got {other:?}"),
        }
        match &events[2] {
            Event::FileEnd { entry, md5, .. } => {
                assert_eq!(entry.arc_path, "a.txt");
                assert_eq!(*md5, None);
            }
            other => panic!("expected FileEnd, got {other:?}"),
        }
        match &events[3] {
            Event::FileStart { entry, resumed, .. } => {
                assert_eq!(entry.arc_path, "b.txt");
                assert!(!resumed);
            }
            other => panic!("expected FileStart, got {other:?}"),
        }
        // b.txt keeps its digest.
        let b_md5 = events.iter().find_map(|event| match event {
            Event::FileEnd { entry, md5, .. } if entry.arc_path == "b.txt" => Some(*md5),
            _ => None,
        });
        assert_eq!(b_md5, Some(Some(md5_of(b"second"))));
    }

    #[test]
    fn resume_at_a_track_boundary_is_not_resumed() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"x").unwrap();
        fs::write(root.path().join("b"), b"y").unwrap();

        let tape = record(root.path());
        let start = tape.offset_of("b").unwrap().unwrap();
        let player = TapePlayer::new(&tape, root.path());
        let first = player.play(start).unwrap().next().unwrap().unwrap();
        match first {
            Event::FileStart { entry, resumed, .. } => {
                assert_eq!(entry.arc_path, "b");
                assert!(!resumed);
            }
            other => panic!("expected FileStart, got {other:?}"),
        }
    }

    #[test]
    fn resume_inside_the_header_keeps_the_digest() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"payload").unwrap();

        let tape = record(root.path());
        let (events, bytes) = collect(&tape, root.path(), 100);
        assert_eq!(bytes.len() as u64, tape.total_size() - 100);

        let md5 = events.iter().find_map(|event| match event {
            Event::FileEnd { md5, .. } => Some(*md5),
            _ => None,
        });
        assert_eq!(md5, Some(Some(md5_of(b"payload"))));
    }

    #[test]
    fn play_at_total_size_completes_immediately() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"x").unwrap();

        let tape = record(root.path());
        let player = TapePlayer::new(&tape, root.path());
        let events: Vec<Event> = player
            .play(tape.total_size())
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::TapeCompleted));
    }

    #[test]
    fn play_past_the_end_is_invalid() {
        let root = tempfile::tempdir().unwrap();
        let tape = record(root.path());
        let player = TapePlayer::new(&tape, root.path());
        assert!(matches!(
            player.play(tape.total_size() + 1),
            Err(TapeError::InvalidOffset { .. })
        ));
    }

    #[test]
    fn resume_inside_the_terminator_emits_its_tail() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"x").unwrap();

        let tape = record(root.path());
        let (events, bytes) = collect(&tape, root.path(), tape.total_size() - 40);
        assert_eq!(bytes, vec![0u8; 40]);
        assert!(matches!(events.last(), Some(Event::TapeCompleted)));
    }

    #[test]
    fn empty_tape_is_only_the_terminator() {
        let root = tempfile::tempdir().unwrap();
        let tape = record(root.path());
        let (_, bytes) = collect(&tape, root.path(), 0);
        assert_eq!(bytes, vec![0u8; 1024]);
    }

    #[test]
    fn touched_mtime_aborts_before_the_header() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"x").unwrap();
        fs::write(root.path().join("b"), b"y").unwrap();
        set_mtime(&root.path().join("a"), 1_000_000);
        set_mtime(&root.path().join("b"), 1_000_000);

        let tape = record(root.path());
        set_mtime(&root.path().join("b"), 2_000_000);

        let player = TapePlayer::new(&tape, root.path());
        let mut bytes = 0u64;
        let mut failure = None;
        for event in player.play(0).unwrap() {
            match event {
                Ok(Event::FileData { bytes: data }) => bytes += data.len() as u64,
                Ok(_) => {}
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        assert!(matches!(failure, Some(TapeError::Integrity(_))));
        // Everything of "a", nothing of "b": not even its header.
        assert_eq!(bytes, 1024);
    }

    #[test]
    fn changed_size_aborts_the_stream() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"short").unwrap();

        let tape = record(root.path());
        fs::write(root.path().join("a"), b"now much longer").unwrap();

        let player = TapePlayer::new(&tape, root.path());
        let outcome: Result<Vec<Event>> = player.play(0).unwrap().collect();
        assert!(matches!(outcome, Err(TapeError::Integrity(_))));
    }

    #[test]
    fn retargeted_symlink_aborts_the_stream() {
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("old", root.path().join("l")).unwrap();

        let tape = record(root.path());
        fs::remove_file(root.path().join("l")).unwrap();
        std::os::unix::fs::symlink("new", root.path().join("l")).unwrap();

        let player = TapePlayer::new(&tape, root.path());
        let outcome: Result<Vec<Event>> = player.play(0).unwrap().collect();
        assert!(matches!(outcome, Err(TapeError::Integrity(_))));
    }

    #[test]
    fn touched_directory_aborts_the_stream() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("d")).unwrap();
        set_mtime(&root.path().join("d"), 1_000_000);

        let tape = record(root.path());
        // New content bumps the directory's mtime.
        fs::write(root.path().join("d/late"), b"x").unwrap();

        let player = TapePlayer::new(&tape, root.path());
        let outcome: Result<Vec<Event>> = player.play(0).unwrap().collect();
        assert!(matches!(outcome, Err(TapeError::Integrity(_))));
    }

    #[test]
    fn missing_file_surfaces_as_io_error() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"x").unwrap();

        let tape = record(root.path());
        fs::remove_file(root.path().join("a")).unwrap();

        let player = TapePlayer::new(&tape, root.path());
        let outcome: Result<Vec<Event>> = player.play(0).unwrap().collect();
        assert!(matches!(outcome, Err(TapeError::Io(_))));
    }

    #[test]
    fn stream_fuses_after_a_failure() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"x").unwrap();

        let tape = record(root.path());
        fs::remove_file(root.path().join("a")).unwrap();

        let player = TapePlayer::new(&tape, root.path());
        let mut stream = player.play(0).unwrap();
        assert!(stream.any(|item| item.is_err()));
        assert!(stream.next().is_none());
    }

    #[test]
    fn identity_overrides_reach_the_headers() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"x").unwrap();

        let tape = record(root.path());
        let mut options = TapeOptions::default();
        options.override_uid = Some(1000);
        options.override_uname = Some("copy".to_string());
        let player = TapePlayer::with_options(&tape, root.path(), options);

        let mut bytes = Vec::new();
        for event in player.play(0).unwrap() {
            if let Event::FileData { bytes: data } = event.unwrap() {
                bytes.extend_from_slice(&data);
            }
        }
        assert_eq!(&bytes[108..116], b"001750 \0");
        assert_eq!(&bytes[265..270], b"copy\0");
        // gid stays flattened.
        assert_eq!(&bytes[116..124], b"000000 \0");
    }

    #[test]
    fn emitted_headers_carry_valid_checksums() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("d")).unwrap();
        fs::write(root.path().join("d/a"), b"abc").unwrap();

        let tape = record(root.path());
        let (_, bytes) = collect(&tape, root.path(), 0);

        for index in 0..tape.count() {
            let start = tape.get(index).unwrap().start_offset as usize;
            let block = &bytes[start..start + 512];
            let mut sum = 0u32;
            for (i, b) in block.iter().enumerate() {
                sum += if (148..156).contains(&i) {
                    u32::from(b' ')
                } else {
                    u32::from(*b)
                };
            }
            let text = std::str::from_utf8(&block[148..154]).unwrap();
            assert_eq!(u32::from_str_radix(text, 8).unwrap(), sum);
        }
    }

    #[test]
    fn verify_tracks_the_live_tree() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"x").unwrap();

        let tape = record(root.path());
        let player = TapePlayer::new(&tape, root.path());
        assert!(player.verify().unwrap());

        set_mtime(&root.path().join("a"), 2_000_000);
        assert!(!player.verify().unwrap());
    }

    #[test]
    fn verify_flags_missing_tracks() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), b"x").unwrap();

        let tape = record(root.path());
        fs::remove_file(root.path().join("a")).unwrap();

        let player = TapePlayer::new(&tape, root.path());
        assert!(!player.verify().unwrap());
    }
}
