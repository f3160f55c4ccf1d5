//! Persistent key-value storage.
//!
//! The personalization engine keeps its session credentials here. Reads return
//! `Option` so callers never see a sentinel for missing values.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An I/O error occurred during persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The storage file could not be parsed or written as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pluggable string key-value storage.
pub trait KeyValueStorage: Send + Sync {
    /// Read `key`, or `None` if it is not set.
    fn get_value(&self, key: &str) -> Option<String>;

    /// Set `key` to `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value could not be persisted.
    fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Set several keys at once.
    ///
    /// The default writes them one by one; implementations that persist
    /// should either apply all of them or none.
    ///
    /// # Errors
    ///
    /// Returns an error if the values could not be persisted.
    fn set_values(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.set_value(key, value)?;
        }
        Ok(())
    }

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the change could not be persisted.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Remove every key.
    ///
    /// # Errors
    ///
    /// Returns an error if the change could not be persisted.
    fn clear(&self) -> Result<(), StorageError>;
}

/// In-memory storage, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-populated with `values`.
    #[must_use]
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_value(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// Storage persisted as a single JSON object on disk.
///
/// The whole document is rewritten on every mutation.
pub struct FileStorage {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open the storage file at `path`, creating parent directories.
    ///
    /// A missing file starts out empty.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created or the
    /// file cannot be read, and [`StorageError::Serialization`] if it is not a
    /// JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), "Opened storage file");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Location of the storage file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to a copy, persist it, then publish the copy.
    ///
    /// On a failed write the in-memory map keeps matching the file.
    fn update<F>(&self, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = values.clone();
        f(&mut next);
        let json = serde_json::to_string_pretty(&next)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        *values = next;
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get_value(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn set_values(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        self.update(|values| {
            for (key, value) in entries {
                values.insert((*key).to_string(), (*value).to_string());
            }
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|values| {
            values.remove(key);
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.update(BTreeMap::clear)
    }
}

impl fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn KeyValueStorage) {
        assert_eq!(storage.get_value("serverName"), None);
        storage.set_value("serverName", "pos-01").expect("set");
        storage.set_value("serverPort", "6140").expect("set");
        assert_eq!(storage.get_value("serverName").as_deref(), Some("pos-01"));

        storage.remove("serverName").expect("remove");
        storage.remove("serverName").expect("remove missing");
        assert_eq!(storage.get_value("serverName"), None);
        assert_eq!(storage.get_value("serverPort").as_deref(), Some("6140"));

        storage.clear().expect("clear");
        assert_eq!(storage.get_value("serverPort"), None);
    }

    #[test]
    fn test_memory_storage_contract() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn test_file_storage_contract() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::open(dir.path().join("session.json")).expect("open");
        exercise(&storage);
    }

    #[test]
    fn test_memory_storage_with_values() {
        let storage = MemoryStorage::with_values([("deviceToken", "abc")]);
        assert_eq!(storage.get_value("deviceToken").as_deref(), Some("abc"));
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("session.json");
        {
            let storage = FileStorage::open(&path).expect("open");
            storage.set_value("deviceToken", "t-123").expect("set");
        }
        let reopened = FileStorage::open(&path).expect("reopen");
        assert_eq!(reopened.get_value("deviceToken").as_deref(), Some("t-123"));
        assert_eq!(reopened.path(), path.as_path());
    }

    #[test]
    fn test_file_storage_failed_write_keeps_previous_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        let storage = FileStorage::open(&path).expect("open");
        storage.set_value("deviceToken", "old").expect("set");

        // A directory where the temp file goes makes the write fail.
        std::fs::create_dir(path.with_extension("json.tmp")).expect("block tmp");

        assert!(storage.set_value("deviceToken", "new").is_err());
        assert_eq!(storage.get_value("deviceToken").as_deref(), Some("old"));

        let batch = storage.set_values(&[("serverName", "pos-02"), ("deviceToken", "new")]);
        assert!(batch.is_err());
        assert_eq!(storage.get_value("serverName"), None);
        assert_eq!(storage.get_value("deviceToken").as_deref(), Some("old"));

        let reopened = FileStorage::open(&path).expect("reopen");
        assert_eq!(reopened.get_value("deviceToken").as_deref(), Some("old"));
    }

    #[test]
    fn test_set_values_writes_every_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::open(dir.path().join("session.json")).expect("open");
        storage
            .set_values(&[("serverName", "pos-01"), ("serverPort", "6140")])
            .expect("set");
        assert_eq!(storage.get_value("serverName").as_deref(), Some("pos-01"));
        assert_eq!(storage.get_value("serverPort").as_deref(), Some("6140"));

        let memory = MemoryStorage::new();
        memory.set_values(&[("deviceToken", "t-1")]).expect("set");
        assert_eq!(memory.get_value("deviceToken").as_deref(), Some("t-1"));
    }

    #[test]
    fn test_file_storage_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").expect("write");
        let err = FileStorage::open(&path).unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
