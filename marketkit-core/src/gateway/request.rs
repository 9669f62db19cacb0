//! Request and response values passed through the gateway.

use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::MarketKitError;

/// Error code the backend uses for suspended accounts.
pub const ACCOUNT_BLOCKED_CODE: &str = "ACCOUNT_BLOCKED";

/// An outbound API call, addressed by path relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Creates a request for `path`. A missing leading slash is added.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            method,
            path,
            body: None,
        }
    }

    /// `GET path`
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PATCH path`
    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// `DELETE path`
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attaches a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`MarketKitError::SerializationError`] if `body` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, MarketKitError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the API base URL.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) const fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }
}

/// A response the gateway passed through to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    status: u16,
    body: String,
}

impl ApiResponse {
    pub(crate) const fn new(status: u16, body: String) -> Self {
        Self { status, body }
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Raw body.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Deserializes the body.
    ///
    /// # Errors
    ///
    /// Returns [`MarketKitError::SerializationError`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, MarketKitError> {
        serde_json::from_str(&self.body).map_err(|e| MarketKitError::SerializationError {
            error: format!("failed to parse response (status {}): {e}", self.status),
        })
    }

    /// Turns a non-2xx response into [`MarketKitError::Api`].
    ///
    /// # Errors
    ///
    /// Returns [`MarketKitError::Api`] carrying the status and body.
    pub fn error_for_status(self) -> Result<Self, MarketKitError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(MarketKitError::Api {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Error object returned by the backend.
#[derive(Debug, Deserialize)]
struct BackendError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, alias = "reason")]
    message: Option<String>,
}

/// Returns the suspension reason if `body` is the backend's account-blocked
/// error object.
pub(crate) fn blocked_reason(status: u16, body: &str) -> Option<String> {
    if (200..300).contains(&status) {
        return None;
    }
    let error: BackendError = serde_json::from_str(body).ok()?;
    (error.code.as_deref() == Some(ACCOUNT_BLOCKED_CODE))
        .then(|| error.message.unwrap_or_default())
}
