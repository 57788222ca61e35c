//! Key-value persistence contract
//!
//! The core consumes persistence as a simple get/set contract: `load` with a
//! missing key returns `None`, and `save` degrades to "not persisted" on any
//! backend failure (full disk included) instead of surfacing an error. The
//! measurement pipeline never depends on storage succeeding.

use std::collections::HashMap;
use std::path::PathBuf;

/// Simple key-value persistence boundary
pub trait Storage {
    /// Fetch the value for `key`, or `None` if absent or unreadable
    fn load(&self, key: &str) -> Option<String>;

    /// Persist `value` under `key`; failures are logged and swallowed
    fn save(&mut self, key: &str, value: &str);
}

/// File-backed storage: one JSON file per key under a data directory
pub struct JsonFileStorage {
    dir: PathBuf,
}

impl JsonFileStorage {
    /// Create storage rooted at `dir`; the directory is created on first save
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Storage for JsonFileStorage {
    fn load(&self, key: &str) -> Option<String> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(_) => {
                tracing::debug!(path = %path.display(), "no stored value");
                None
            }
        }
    }

    fn save(&mut self, key: &str, value: &str) {
        let path = self.path_for(key);
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "value not persisted");
            return;
        }
        if let Err(e) = std::fs::write(&path, value) {
            tracing::warn!(path = %path.display(), error = %e, "value not persisted");
        }
    }
}

/// In-memory storage for tests and storage-less operation
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn save(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }
}
