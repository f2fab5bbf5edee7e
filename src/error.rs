use std::io;

/// Error kinds surfaced by the store.
///
/// `deleted-entry` from spec.md §4.2 is deliberately absent here: it is an
/// internal sentinel used only by the segment walker (see `WalkEntry` in
/// `storage.rs`), never a user-visible error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("key not found")]
    KeyNotFound,

    #[error("no need to merge")]
    NoNeedToMerge,

    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("short write: expected {expected} bytes, wrote {got}")]
    ShortWrite { expected: usize, got: usize },

    #[error("crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Crc { stored: u32, computed: u32 },

    #[error("buffer too small for payload: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("unknown record flag: {0}")]
    UnknownFlag(u8),

    #[error("invalid segment file name: {0}")]
    InvalidSegmentName(String),

    #[error("another process already holds the store lock")]
    AlreadyLocked,
}

impl Error {
    /// True when this error is exactly the "ran off the end of the segment"
    /// condition a walker uses to know it has finished a file, as opposed to
    /// a genuine short read in the middle of a record.
    pub(crate) fn is_eof(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }

    pub(crate) fn eof() -> Self {
        Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "end of segment"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
