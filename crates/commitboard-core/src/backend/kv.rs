//! Local key/value persistence, scoped to one client
//!
//! The file-backed store keeps every entry in a single JSON object under
//! `~/.cache/commitboard/local-store.json`.

use crate::error::CoreError;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    fn set(&self, key: &str, value: String) -> Result<(), CoreError>;

    fn remove(&self, key: &str) -> Result<(), CoreError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: DashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: String) -> Result<(), CoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// JSON-file store, rewritten on every mutation
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    /// Default location under the user cache directory
    pub fn default_path() -> Result<PathBuf, CoreError> {
        let cache_dir = dirs::cache_dir().ok_or_else(|| CoreError::InvalidConfig {
            message: "Could not determine cache directory".to_string(),
        })?;
        Ok(cache_dir.join("commitboard").join("local-store.json"))
    }

    /// Open (or lazily create) the store at `path`
    ///
    /// A corrupt file is treated as empty; it is overwritten on the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();

        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Local store is corrupt, starting empty");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(CoreError::CacheRead { path, source: e }),
        };

        debug!(path = %path.display(), entries = entries.len(), "Local store opened");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), CoreError> {
        let write_err = |source| CoreError::CacheWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let json = serde_json::to_string_pretty(entries).map_err(|e| CoreError::Decode {
            resource: self.path.display().to_string(),
            message: e.to_string(),
            source: e,
        })?;

        std::fs::write(&self.path, json).map_err(write_err)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), CoreError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}
