//! The database facade: ties the key directory and segment storage
//! together behind a single reader-writer lock, and owns startup
//! (create-or-recover), shutdown, and merge.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use fs4::FileExt;

use crate::entry::{Entry, META_SIZE};
use crate::error::{Error, Result};
use crate::fs_util;
use crate::keydir::{DirEntry, KeyDir};
use crate::storage::{Storage, WalkEntry};

const LOCK_FILE: &str = "db.lock";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory the store lives in. Created on first open.
    pub dir: PathBuf,
    /// Active-file rotation threshold in bytes. Values `<= 0` fall back to
    /// the 256 MiB default (see [`fs_util::effective_segment_size`]).
    pub segment_size: i64,
}

impl Options {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), segment_size: 0 }
    }

    pub fn with_segment_size(mut self, segment_size: i64) -> Self {
        self.segment_size = segment_size;
        self
    }
}

struct Inner {
    keydir: KeyDir,
    storage: Storage,
}

/// An open, embeddable key-value store.
///
/// Cloning is not supported; share a single `Db` behind an `Arc` across
/// threads instead. Internally a single [`RwLock`] serializes writers
/// against each other and against readers, matching spec.md §5's
/// store-wide reader-writer model.
pub struct Db {
    inner: RwLock<Inner>,
    /// Advisory process-exclusivity lock, held for the lifetime of the
    /// `Db`. Dropped (and thus released) when the `Db` is dropped.
    _lock_file: File,
}

impl Db {
    /// Opens the store at `options.dir`, creating it if absent and
    /// recovering the key directory from disk otherwise. Exactly one of
    /// create/recover runs per open.
    pub fn open(options: Options) -> Result<Self> {
        let segment_size = fs_util::effective_segment_size(options.segment_size);
        let dir = options.dir;

        let (keydir, storage) = if fs_util::dir_exists(&dir)? {
            recover(&dir, segment_size)?
        } else {
            std::fs::create_dir_all(&dir)?;
            (KeyDir::new(), Storage::bootstrap_active(dir.clone(), segment_size)?)
        };

        let lock_file = acquire_process_lock(&dir)?;

        log::info!("opened store at {} ({} keys live)", dir.display(), keydir.len());
        Ok(Self { inner: RwLock::new(Inner { keydir, storage }), _lock_file: lock_file })
    }

    /// Writes `value` for `key`, overwriting any previous value.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let timestamp = now_nanos();
        let record = Entry::new_put(key, value, timestamp).encode();
        let idx = inner.storage.write_at(&record)?;
        inner.keydir.update(
            key.to_vec(),
            DirEntry {
                fid: idx.fid,
                off: idx.off,
                key_size: key.len() as u64,
                value_size: value.len() as u64,
                timestamp,
            },
        );
        Ok(())
    }

    /// Looks up `key`, returning its current value or `Error::KeyNotFound`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let inner = self.inner.read().unwrap();
        let dir_entry = inner.keydir.find(key).ok_or(Error::KeyNotFound)?;

        let mut scratch = vec![0u8; META_SIZE + (dir_entry.key_size + dir_entry.value_size) as usize];
        let entry = inner.storage.read_full_entry(dir_entry.fid, dir_entry.off, &mut scratch)?;
        Ok(entry.value)
    }

    /// Appends a tombstone for `key` and removes it from the key directory.
    /// Deleting a key with no live entry returns `Error::KeyNotFound`.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.keydir.find(key).ok_or(Error::KeyNotFound)?;
        let timestamp = now_nanos();
        let record = Entry::new_tombstone(key, timestamp).encode();
        inner.storage.write_at(&record)?;
        inner.keydir.delete(key);
        Ok(())
    }

    /// Rewrites all sealed (non-active) segments, keeping only the record
    /// each key directory entry still points at, by re-appending each live
    /// record straight into the active segment and unlinking the old
    /// segment files once every sealed segment has been walked. Returns
    /// `Error::NoNeedToMerge` if there is nothing sealed to compact (a
    /// freshly opened or single-segment store).
    ///
    /// Relocated records land in the *same* active file writes go to, not a
    /// side staging area: a crash mid-merge leaves duplicate live records
    /// (old copy in a sealed segment, new copy in the active file) that
    /// ordinary recovery's latest-wins walk resolves on its own, per
    /// spec.md §4.4's crash-safety note. A staging directory would instead
    /// need its own crash recovery, which the spec never asks for.
    pub fn merge(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let active_fid = inner.storage.active_fid();
        let sealed: Vec<u64> =
            fs_util::list_segment_ids(inner.storage.dir())?.into_iter().filter(|&fid| fid != active_fid).collect();
        if sealed.is_empty() {
            return Err(Error::NoNeedToMerge);
        }

        for fid in &sealed {
            let mut off = 0u64;
            loop {
                let walked = match inner.storage.read_entry(*fid, off) {
                    Ok(w) => w,
                    Err(e) if e.is_eof() => break,
                    Err(e) => return Err(e),
                };
                let record_len = walked.record_len();

                // Resolution C: compare against the key directory's recorded
                // offset *before* advancing `off` past this record — the
                // source this spec was distilled from advanced first and
                // compared after, which silently dropped the final live
                // record of every sealed segment.
                let is_live = match &walked {
                    WalkEntry::Put { key, .. } => {
                        matches!(inner.keydir.find(key), Some(d) if d.fid == *fid && d.off == off)
                    }
                    WalkEntry::Tombstone { .. } => false,
                };

                if is_live {
                    if let WalkEntry::Put { key, value, timestamp, .. } = walked {
                        let record = Entry::new_put(&key, &value, timestamp).encode();
                        let idx = inner.storage.write_at(&record)?;
                        inner.keydir.update(
                            key.clone(),
                            DirEntry {
                                fid: idx.fid,
                                off: idx.off,
                                key_size: key.len() as u64,
                                value_size: value.len() as u64,
                                timestamp,
                            },
                        );
                    }
                }

                off += record_len;
            }
        }

        for fid in &sealed {
            inner.storage.evict(*fid);
            std::fs::remove_file(fs_util::segment_path(inner.storage.dir(), *fid))?;
        }

        log::info!("merged {} sealed segment(s) in {}", sealed.len(), inner.storage.dir().display());
        Ok(())
    }
}

/// Rebuilds the key directory by walking every segment in ascending fid
/// order. The highest-fid segment is treated as the active one; if its tail
/// ends in a short read exactly at the point a new record should start,
/// that segment is truncated to the last good record and recovery
/// continues — SPEC_FULL.md Resolution F, a torn write from a crash
/// mid-append rather than corruption. Any other decode failure (an unknown
/// flag byte, an oversized payload) is propagated as a fatal error even on
/// the active segment, since it isn't the torn-tail shape.
fn recover(dir: &Path, segment_size: u64) -> Result<(KeyDir, Storage)> {
    let mut keydir = KeyDir::new();
    let mut storage = Storage::empty(dir.to_path_buf(), segment_size);

    let fids = fs_util::list_segment_ids(dir)?;
    if fids.is_empty() {
        return Ok((keydir, Storage::bootstrap_active(dir.to_path_buf(), segment_size)?));
    }

    let highest = *fids.last().unwrap();
    for &fid in &fids {
        let file = std::fs::OpenOptions::new().read(true).write(true).open(fs_util::segment_path(dir, fid))?;
        storage.register_fid(fid, file);

        let mut off = 0u64;
        loop {
            match storage.read_entry(fid, off) {
                Ok(walked) => {
                    let record_len = walked.record_len();
                    match walked {
                        WalkEntry::Put { key, timestamp, .. } => {
                            keydir.update(
                                key.clone(),
                                DirEntry {
                                    fid,
                                    off,
                                    key_size: key.len() as u64,
                                    value_size: record_len - crate::entry::META_SIZE as u64 - key.len() as u64,
                                    timestamp,
                                },
                            );
                        }
                        WalkEntry::Tombstone { key, .. } => {
                            keydir.delete(&key);
                        }
                    }
                    off += record_len;
                }
                Err(e) if e.is_eof() => {
                    if fid == highest {
                        break;
                    }
                    return Err(e);
                }
                // A short read at the point a new record should start means
                // the OS has fewer bytes than a full record on disk — a torn
                // write from a crash mid-append. Any other error (an unknown
                // flag byte, a payload too large for its segment) is genuine
                // corruption, not a torn tail, and must not be truncated away
                // even on the active segment.
                Err(e) if fid == highest && matches!(e, Error::ShortRead { .. }) => {
                    log::warn!(
                        "truncating torn tail of active segment {fid} in {} at offset {off}: {e}",
                        dir.display()
                    );
                    let file = std::fs::OpenOptions::new().write(true).open(fs_util::segment_path(dir, fid))?;
                    file.set_len(off)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if fid == highest {
            storage.set_active(fid, off);
        }
    }

    Ok((keydir, storage))
}

fn now_nanos() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_nanos() as u64
}

/// Grabs an advisory exclusive lock on `db.lock` inside `dir`, so two
/// processes cannot open the same store concurrently. Grounded directly in
/// the `fs4`-based exclusivity check used by the bitcask example in the
/// pack.
fn acquire_process_lock(dir: &Path) -> Result<File> {
    let file = std::fs::OpenOptions::new().create(true).write(true).open(dir.join(LOCK_FILE))?;
    file.try_lock_exclusive().map_err(|_| Error::AlreadyLocked)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &Path) -> Db {
        Db::open(Options::new(dir)).unwrap()
    }

    #[test]
    fn set_then_get() {
        let tmp = tempfile::tempdir().unwrap();
        let db = open(&tmp.path().join("store"));
        db.set(b"k", b"v1").unwrap();
        assert_eq!(db.get(b"k").unwrap(), b"v1");
    }

    #[test]
    fn overwrite_returns_latest_value() {
        let tmp = tempfile::tempdir().unwrap();
        let db = open(&tmp.path().join("store"));
        db.set(b"k", b"v1").unwrap();
        db.set(b"k", b"v2").unwrap();
        assert_eq!(db.get(b"k").unwrap(), b"v2");
    }

    #[test]
    fn get_missing_key_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let db = open(&tmp.path().join("store"));
        assert!(matches!(db.get(b"nope"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn delete_then_get_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let db = open(&tmp.path().join("store"));
        db.set(b"k", b"v1").unwrap();
        db.delete(b"k").unwrap();
        assert!(matches!(db.get(b"k"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn delete_missing_key_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let db = open(&tmp.path().join("store"));
        assert!(matches!(db.delete(b"nope"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn reopen_recovers_state() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("store");
        {
            let db = open(&dir);
            db.set(b"a", b"1").unwrap();
            db.set(b"b", b"2").unwrap();
            db.delete(b"a").unwrap();
        }
        let db = open(&dir);
        assert!(matches!(db.get(b"a"), Err(Error::KeyNotFound)));
        assert_eq!(db.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn rotation_then_reopen_preserves_all_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("store");
        {
            let db = Db::open(Options::new(&dir).with_segment_size(64)).unwrap();
            for i in 0..50u32 {
                db.set(format!("k{i}").as_bytes(), format!("v{i}").as_bytes()).unwrap();
            }
        }
        let db = Db::open(Options::new(&dir).with_segment_size(64)).unwrap();
        for i in 0..50u32 {
            assert_eq!(db.get(format!("k{i}").as_bytes()).unwrap(), format!("v{i}").as_bytes());
        }
    }

    #[test]
    fn merge_with_single_segment_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let db = open(&tmp.path().join("store"));
        db.set(b"k", b"v").unwrap();
        assert!(matches!(db.merge(), Err(Error::NoNeedToMerge)));
    }

    #[test]
    fn merge_compacts_sealed_segments_and_preserves_latest_values() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("store");
        let db = Db::open(Options::new(&dir).with_segment_size(64)).unwrap();
        for i in 0..50u32 {
            db.set(format!("k{i}").as_bytes(), format!("v{i}").as_bytes()).unwrap();
        }
        db.set(b"k0", b"overwritten").unwrap();
        db.delete(b"k1").unwrap();

        db.merge().unwrap();

        assert_eq!(db.get(b"k0").unwrap(), b"overwritten");
        assert!(matches!(db.get(b"k1"), Err(Error::KeyNotFound)));
        for i in 2..50u32 {
            assert_eq!(db.get(format!("k{i}").as_bytes()).unwrap(), format!("v{i}").as_bytes());
        }
    }

    #[test]
    fn second_open_of_same_dir_fails_while_first_is_held() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("store");
        let _first = open(&dir);
        let second = Db::open(Options::new(&dir));
        assert!(matches!(second, Err(Error::AlreadyLocked)));
    }
}
