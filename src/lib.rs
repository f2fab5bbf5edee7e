//! `bitkeg` is an embeddable, log-structured key-value store in the
//! Bitcask family: writes are appended to a sequence of immutable segment
//! files, and an in-memory key directory maps each live key to the
//! location of its most recent value. Reads are a single positioned file
//! read; writes are a single append plus an index update; compaction
//! (`merge`) reclaims space from overwritten and deleted keys by rewriting
//! sealed segments down to their live records.
//!
//! ```no_run
//! use bitkeg::{Db, Options};
//!
//! let db = Db::open(Options::new("/tmp/my-store"))?;
//! db.set(b"hello", b"world")?;
//! assert_eq!(db.get(b"hello")?, b"world");
//! db.delete(b"hello")?;
//! # Ok::<(), bitkeg::Error>(())
//! ```

mod db;
mod entry;
pub mod error;
mod fs_util;
mod keydir;
mod storage;

pub use db::{Db, Options};
pub use error::{Error, Result};
