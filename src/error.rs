use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TapeError>;

#[derive(Error, Debug)]
pub enum TapeError {
    /// Total archive path over 255 bytes, a link target over 100 bytes, or a
    /// path with no legal name/prefix split.
    #[error("path does not fit ustar name/prefix limits: {0}")]
    PathTooLong(String),

    /// A directory whose final name component cannot fit the 100-byte name
    /// field on its own.
    #[error("directory name does not fit the ustar name field: {0}")]
    DirectoryNameTooLong(String),

    #[error("path is not valid utf-8: {0:?}")]
    NonUtf8Path(PathBuf),

    /// Socket, fifo, or device encountered under strict filtering.
    #[error("unsupported file kind: {0}")]
    UnsupportedKind(String),

    /// An identity override that cannot be represented in its header field.
    #[error("header field value out of range: {0}")]
    HeaderField(String),

    #[error("snapshot is corrupt: {0}")]
    SnapshotCorrupt(String),

    /// The source tree no longer matches the promises recorded at snapshot
    /// time. Fatal; the stream stops at the discrepancy.
    #[error("source diverged from snapshot: {0}")]
    Integrity(String),

    #[error("start offset {offset} is past the end of the stream ({len})")]
    InvalidOffset { offset: u64, len: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Walk(#[from] ignore::Error),
}
