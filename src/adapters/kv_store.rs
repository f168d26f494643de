//! [`KeyValueStore`] adapters.
//!
//! [`MemoryKeyValueStore`] is a bare `HashMap` for tests. [`FileKeyValueStore`]
//! adds durability: every `set`/`remove` re-encodes the whole table
//! with `postcard` and overwrites the backing file before returning,
//! satisfying the "durable before returning" requirement the security
//! envelope's nonce persistence depends on (§5 "Shared-resource
//! policy").

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use crate::ports::KeyValueStore;

/// Plain in-memory store, used by unit/integration tests.
pub struct MemoryKeyValueStore {
    entries: RefCell<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: RefCell::new(HashMap::new()) }
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &[u8]) {
        self.entries.borrow_mut().insert(key.to_string(), value.to_vec());
    }

    fn remove(&mut self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }
}

/// Durable store backed by a single `postcard`-encoded file, the
/// host stand-in for the NVS/flash key-value partition (§1 "Out of
/// scope").
pub struct FileKeyValueStore {
    path: PathBuf,
    table: BTreeMap<String, Vec<u8>>,
}

impl FileKeyValueStore {
    /// Load `path` if it exists, otherwise start with an empty table.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table = fs::read(&path)
            .ok()
            .and_then(|bytes| postcard::from_bytes(&bytes).ok())
            .unwrap_or_default();
        Self { path, table }
    }

    fn flush(&self) {
        if let Ok(bytes) = postcard::to_allocvec(&self.table) {
            let _ = fs::write(&self.path, bytes);
        }
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.table.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &[u8]) {
        self.table.insert(key.to_string(), value.to_vec());
        self.flush();
    }

    fn remove(&mut self, key: &str) {
        self.table.remove(key);
        self.flush();
    }
}
