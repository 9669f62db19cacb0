//! Errors returned by the SDK and their coarse classification.

use strum::{Display, EnumString};
use thiserror::Error;

use crate::storage::StorageError;

/// Error outputs from `MarketKit`
#[derive(Debug, Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum MarketKitError {
    /// The account is suspended. Terminal for the session until an admin lifts it.
    #[error("account_blocked: {reason}")]
    AccountBlocked {
        /// Reason given by the backend, if any.
        reason: String,
    },
    /// The access token could not be refreshed, or the retried request was still rejected.
    #[error("session_expired")]
    SessionExpired,
    /// A refresh is already running.
    ///
    /// Not returned by this crate: callers join the running refresh instead.
    /// Present so hosts can map the whole [`ErrorKind`] taxonomy.
    #[error("refresh_in_flight")]
    RefreshInFlight,
    /// Realtime channel failure. Recovered by reconnecting, so it is logged and
    /// never returned to a caller.
    #[error("transport_error: {error}")]
    TransportError {
        /// Description of the failure.
        error: String,
    },
    /// Network connection error with details
    #[error("network_error: {error} (url: {url}, status: {status:?})")]
    NetworkError {
        /// Requested URL.
        url: String,
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// Description of the failure.
        error: String,
    },
    /// The backend answered with an error status that no session rule applies to.
    #[error("api_error: status {status}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
    /// The presented input is not valid for the requested operation
    #[error("invalid_input_{attribute}: {reason}")]
    InvalidInput {
        /// Name of the offending input.
        attribute: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Unexpected error serializing information
    #[error("serialization_error: {error}")]
    SerializationError {
        /// Description of the failure.
        error: String,
    },
    /// Persisted session storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Unexpected internal failure (poisoned locks, missing runtime).
    #[error("internal_error: {error}")]
    Internal {
        /// Description of the failure.
        error: String,
    },
}

/// Coarse classification of a [`MarketKitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, uniffi::Enum)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Suspension reported by a response or a push.
    AccountBlocked,
    /// Re-login required.
    SessionExpired,
    /// Waiting on an in-flight refresh.
    RefreshInFlight,
    /// Realtime channel failure.
    TransportError,
    /// Request-level failure surfaced to the caller.
    NetworkError,
    /// Anything else, handled locally by the caller.
    Other,
}

impl MarketKitError {
    /// Returns the class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountBlocked { .. } => ErrorKind::AccountBlocked,
            Self::SessionExpired => ErrorKind::SessionExpired,
            Self::RefreshInFlight => ErrorKind::RefreshInFlight,
            Self::TransportError { .. } => ErrorKind::TransportError,
            Self::NetworkError { .. } => ErrorKind::NetworkError,
            Self::Api { .. }
            | Self::InvalidInput { .. }
            | Self::SerializationError { .. }
            | Self::Storage(_)
            | Self::Internal { .. } => ErrorKind::Other,
        }
    }

    /// Whether this error ends the current session (blocked or expired).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AccountBlocked | ErrorKind::SessionExpired
        )
    }

    pub(crate) fn internal(error: impl Into<String>) -> Self {
        Self::Internal {
            error: error.into(),
        }
    }
}

impl From<serde_json::Error> for MarketKitError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError {
            error: error.to_string(),
        }
    }
}
