//! Platform interface for persisted session state.

use super::error::StorageResult;

/// A single write in a batch.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct KeyWrite {
    /// Key to write.
    pub key: String,
    /// New value, or `None` to remove the key.
    pub value: Option<String>,
}

impl KeyWrite {
    /// Stores `value` under `key`.
    #[must_use]
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Removes `key`.
    #[must_use]
    pub fn remove(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

/// Durable key-value storage for the session.
///
/// Host applications implement this over their platform storage
/// (keychain, shared preferences, local storage). Batches MUST be applied
/// atomically: after a crash a reader sees either every write of the batch
/// or none of them.
#[uniffi::export(with_foreign)]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get(&self, key: String) -> StorageResult<Option<String>>;

    /// Applies every write in `writes` atomically.
    ///
    /// Removing a key that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be persisted. In that case
    /// none of the writes are visible.
    fn write_batch(&self, writes: Vec<KeyWrite>) -> StorageResult<()>;
}
