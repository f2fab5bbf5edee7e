//! The in-memory key directory: a process-local map from key bytes to the
//! location of that key's most recent live value on disk.

use std::collections::HashMap;

/// Points at the start of the meta header of the latest live entry for a
/// key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub fid: u64,
    pub off: u64,
    pub key_size: u64,
    pub value_size: u64,
    pub timestamp: u64,
}

#[derive(Debug, Default)]
pub struct KeyDir {
    entries: HashMap<Vec<u8>, DirEntry>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Insert-or-overwrite.
    pub fn update(&mut self, key: Vec<u8>, entry: DirEntry) {
        self.entries.insert(key, entry);
    }

    pub fn find(&self, key: &[u8]) -> Option<DirEntry> {
        self.entries.get(key).copied()
    }

    pub fn delete(&mut self, key: &[u8]) -> Option<DirEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &DirEntry)> {
        self.entries.iter()
    }
}
