//! Flat key/value persistence for the security subsystem.
//!
//! All state lives in one JSON object (`security-state.json`) inside the
//! host-provided data directory. Writes go to a temp file that is renamed
//! over the original, so a crash mid-write leaves the previous state intact.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, SessionLockError};

/// File name for the persisted security state.
pub const STATE_FILE_NAME: &str = "security-state.json";

/// A set of writes applied to the store in one atomic file replacement.
#[derive(Debug, Default)]
pub struct StateBatch {
    changes: Vec<(String, Option<Value>)>,
}

impl StateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize>(mut self, key: &str, value: &T) -> Result<Self> {
        self.changes
            .push((key.to_string(), Some(serde_json::to_value(value)?)));
        Ok(self)
    }

    pub fn remove(mut self, key: &str) -> Self {
        self.changes.push((key.to_string(), None));
        self
    }

    /// Append every change in `other`; later changes win on the same key.
    pub fn merge(mut self, other: StateBatch) -> Self {
        self.changes.extend(other.changes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Key/value store backed by a single JSON file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl StateStore {
    /// Open (or create) the store inside `data_dir`.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or an existing
    /// state file cannot be read or parsed.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            SessionLockError::Storage(format!("Failed to create data directory: {}", e))
        })?;

        let path = data_dir.join(STATE_FILE_NAME);
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                SessionLockError::Storage(format!("Failed to read security state: {}", e))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                SessionLockError::Storage(format!("Failed to parse security state: {}", e))
            })?
        } else {
            Map::new()
        };

        debug!("Opened security state at {:?} ({} keys)", path, values.len());
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a typed value. Missing keys yield `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let values = self.lock()?;
        match values.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| SessionLockError::Storage(format!("Invalid value for {}: {}", key, e))),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(key))
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.write_batch(StateBatch::new().set(key, value)?)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.write_batch(StateBatch::new().remove(key))
    }

    /// Apply every change in `batch`, or none of them.
    ///
    /// The in-memory view only changes after the file has been replaced.
    pub fn write_batch(&self, batch: StateBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut values = self.lock()?;
        let mut next = values.clone();
        for (key, change) in batch.changes {
            match change {
                Some(value) => {
                    next.insert(key, value);
                }
                None => {
                    next.remove(&key);
                }
            }
        }

        self.persist(&next)?;
        *values = next;
        Ok(())
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<()> {
        let content = serde_json::to_string_pretty(values).map_err(|e| {
            SessionLockError::Storage(format!("Failed to serialize security state: {}", e))
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).map_err(|e| {
            SessionLockError::Storage(format!("Failed to write security state: {}", e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&temp_path, perms).map_err(|e| {
                SessionLockError::Storage(format!("Failed to restrict security state: {}", e))
            })?;
        }

        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            SessionLockError::Storage(format!("Failed to replace security state: {}", e))
        })?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Map<String, Value>>> {
        self.values
            .lock()
            .map_err(|_| SessionLockError::Storage("Security state lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = StateStore::open(dir.path()).unwrap();
            store.set("security.maxAttempts", &10u32).unwrap();
            store.set("security.pinEnabled", &true).unwrap();
        }

        let store = StateStore::open(dir.path()).unwrap();
        assert_eq!(store.get::<u32>("security.maxAttempts").unwrap(), Some(10));
        assert_eq!(store.get::<bool>("security.pinEnabled").unwrap(), Some(true));
        assert_eq!(store.get::<bool>("security.missing").unwrap(), None);
    }

    #[test]
    fn test_batch_applies_sets_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.set("a", &1u32).unwrap();

        let batch = StateBatch::new().set("b", &2u32).unwrap().remove("a");
        store.write_batch(batch).unwrap();

        assert!(!store.contains("a").unwrap());
        assert_eq!(store.get::<u32>("b").unwrap(), Some(2));
        assert!(
            !dir.path().join("security-state.json.tmp").exists(),
            "Temp file should be renamed away"
        );
    }

    #[test]
    fn test_corrupted_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE_NAME), "{not json").unwrap();
        let err = StateStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, SessionLockError::Storage(_)));
    }

    #[test]
    fn test_merged_batch_later_change_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let batch = StateBatch::new()
            .set("a", &1u32)
            .unwrap()
            .merge(StateBatch::new().remove("a").set("b", &2u32).unwrap());
        store.write_batch(batch).unwrap();

        assert!(!store.contains("a").unwrap(), "Later remove should win");
        assert_eq!(store.get::<u32>("b").unwrap(), Some(2));
    }

    #[test]
    fn test_failed_write_leaves_values_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.set("a", &1u32).unwrap();

        // A directory at the temp path makes the write fail even for root.
        std::fs::create_dir(dir.path().join("security-state.json.tmp")).unwrap();
        let batch = StateBatch::new().set("a", &2u32).unwrap().set("b", &3u32).unwrap();
        let err = store.write_batch(batch).unwrap_err();

        assert!(matches!(err, SessionLockError::Storage(_)));
        assert_eq!(store.get::<u32>("a").unwrap(), Some(1), "Memory must not change");
        assert!(!store.contains("b").unwrap());
        let reopened = StateStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get::<u32>("a").unwrap(), Some(1), "File must not change");
    }
}
