//! `btreefile` is an embeddable, single-file, copy-on-write multi-version
//! B+Tree storage engine.
//!
//! A single [`RecordManager`] owns one random-access file and an arbitrary
//! number of named B+Trees inside it. Every insert or delete produces a new
//! immutable revision built out of freshly allocated pages plus whatever
//! pages from the previous revision were untouched; readers can keep using
//! an old revision for as long as [`RecordManager::set_keep_revisions`]
//! tells the engine to retain it.

mod btree;
mod checker;
mod codec;
mod cursor;
mod manager;
mod page;
mod pager;
mod record;

pub use checker::{IntegrityReport, IntegrityViolation};
pub use codec::{BincodeCodec, BytesCodec, Codec, StringCodec, U64Codec, UnitCodec};
pub use cursor::Cursor;
pub use manager::{BTreeHandle, RecordManager, DEFAULT_FILE_NAME};
pub use pager::File;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Behavioural error kinds surfaced by the engine, per the error handling
/// design: I/O failures, on-disk corruption, and user-level misuse are
/// distinguished so callers can tell a fatal commit failure from a
/// harmless duplicate-name error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("offset {0} violates page alignment or file bounds")]
    InvalidOffset(u64),

    #[error("unexpected end of file while reading a page chain")]
    EndOfFile,

    #[error("a tree named `{0}` is already managed by this file")]
    BTreeAlreadyManaged(String),

    #[error("no tree named `{0}` is managed by this file")]
    BTreeNotManaged(String),

    #[error("failed to materialize the duplicate-values sub-tree: {0}")]
    BTreeCreationError(String),

    #[error("free-page list is corrupt: {0}")]
    FreePageError(String),

    #[error("integrity check failed: {0}")]
    InvalidBTree(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("page size must be a power of two and at least 64 bytes, got {0}")]
    InvalidPageSize(u32),
}
