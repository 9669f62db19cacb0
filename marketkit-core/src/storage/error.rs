//! Error types for persisted session storage.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by session storage backends.
#[derive(Debug, Error, uniffi::Error)]
pub enum StorageError {
    /// Reading or writing the backing medium failed.
    #[error("storage io error: {0}")]
    Io(String),

    /// Serialization/deserialization failures.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A persisted value could not be interpreted.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Key holding the value.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A lock guarding the store was poisoned.
    #[error("storage lock error: {0}")]
    Lock(String),

    /// Unexpected `UniFFI` callback error.
    #[error("unexpected uniffi callback error: {0}")]
    UnexpectedUniFFICallbackError(String),
}

impl From<uniffi::UnexpectedUniFFICallbackError> for StorageError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(error.reason)
    }
}
