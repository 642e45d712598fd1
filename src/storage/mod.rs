//! Durable key/value storage for session state
//!
//! The session only needs string entries that survive a restart of the
//! process. `FileStore` keeps them in a TOML file next to the settings;
//! `MemoryStore` is the non-durable variant used for tests and embedding.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Storage failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("state file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize session state: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to parse state file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("stored entry '{0}' is corrupt")]
    Corrupt(String),
}

/// Persisted string entries.
///
/// `store` and `remove` apply the whole batch or nothing, so a reader never
/// observes half of a credential update.
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn store(&self, entries: &[(&str, String)]) -> Result<(), StoreError>;
    fn remove(&self, keys: &[&str]) -> Result<(), StoreError>;
}

/// In-process store; contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(key).cloned())
    }

    fn store(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for (key, value) in entries {
            guard.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            guard.remove(*key);
        }
        Ok(())
    }
}

/// TOML-file store.
///
/// Every mutation rewrites the file through a sibling temp file and a rename,
/// so a crash mid-write leaves the previous contents in place.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&content).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            BTreeMap::new()
        };

        tracing::debug!("Opened session state at {}", path.display());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let content = toml::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content).map_err(io_err)?;

        // Tokens live in here
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600)).map_err(io_err)?;
        }

        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(key).cloned())
    }

    fn store(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = guard.clone();
        for (key, value) in entries {
            next.insert((*key).to_string(), value.clone());
        }
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if keys.iter().all(|k| !guard.contains_key(*k)) {
            return Ok(());
        }
        let mut next = guard.clone();
        for key in keys {
            next.remove(*key);
        }
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_batch() {
        let store = MemoryStore::new();
        store
            .store(&[("a", "1".to_string()), ("b", "2".to_string())])
            .unwrap();
        assert_eq!(store.load("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.load("b").unwrap().as_deref(), Some("2"));

        store.remove(&["a", "missing"]).unwrap();
        assert!(store.load("a").unwrap().is_none());
        assert_eq!(store.load("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.toml");

        {
            let store = FileStore::open(&path).unwrap();
            store
                .store(&[("accessToken", "{\"token\":\"x\"}".to_string())])
                .unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.load("accessToken").unwrap().as_deref(),
            Some("{\"token\":\"x\"}")
        );
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("session.toml")).unwrap();
        store.store(&[("k", "v".to_string())]).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_remove_is_noop_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        let store = FileStore::open(&path).unwrap();

        store.remove(&["accessToken"]).unwrap();
        // Nothing was stored, so nothing should have been written either.
        assert!(!path.exists());
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        fs::write(&path, "this is = = not toml").unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::Parse { .. })
        ));
    }
}
