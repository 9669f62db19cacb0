//! In-memory session storage, for tests and for hosts that do not persist.

use std::collections::HashMap;
use std::sync::Mutex;

use super::error::{StorageError, StorageResult};
use super::traits::{KeyValueStore, KeyWrite};

/// Key-value store held in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> StorageResult<usize> {
        Ok(self
            .values
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))?
            .len())
    }

    /// Whether the store holds no keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: String) -> StorageResult<Option<String>> {
        let guard = self
            .values
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))?;
        Ok(guard.get(&key).cloned())
    }

    fn write_batch(&self, writes: Vec<KeyWrite>) -> StorageResult<()> {
        let mut guard = self
            .values
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))?;
        for write in writes {
            match write.value {
                Some(value) => guard.insert(write.key, value),
                None => guard.remove(&write.key),
            };
        }
        Ok(())
    }
}
