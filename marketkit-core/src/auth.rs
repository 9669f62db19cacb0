//! Client for the role-specific authentication endpoints.
//!
//! These calls bypass the request gateway: login has no session yet, and
//! refresh authenticates with the durable cookie instead of a bearer token.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::MarketKitError,
    gateway::blocked_reason,
    http_request::Request,
    session::{AccessToken, Role},
};

/// Credentials submitted to `POST /{role}/login`.
#[derive(Clone, Serialize, uniffi::Record)]
pub struct LoginCredentials {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

const fn default_active() -> bool {
    true
}

/// Response of `POST /{role}/login`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub block_reason: Option<String>,
}

/// Response of `POST /{role}/refresh`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub block_reason: Option<String>,
}

/// Outcome of a refresh call, as far as the session is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RefreshGrant {
    /// A new token was issued.
    Token(AccessToken),
    /// The backend reports the account as inactive.
    Blocked(String),
}

#[derive(Debug)]
pub(crate) struct AuthApi {
    base_url: String,
    request: Request,
}

impl AuthApi {
    pub(crate) fn new(base_url: &str, request: Request) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request,
        }
    }

    /// `POST /{role}/login`
    pub(crate) async fn login(
        &self,
        role: Role,
        credentials: &LoginCredentials,
    ) -> Result<LoginResponse, MarketKitError> {
        let url = format!("{}/{role}/login", self.base_url);
        let response = self
            .request
            .handle(self.request.post(&url).json(credentials))
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if let Some(reason) = blocked_reason(status, &body) {
            return Err(MarketKitError::AccountBlocked { reason });
        }
        if !(200..300).contains(&status) {
            return Err(MarketKitError::NetworkError {
                url,
                status: Some(status),
                error: format!("login failed: {body}"),
            });
        }
        serde_json::from_str(&body).map_err(|e| MarketKitError::SerializationError {
            error: format!("failed to parse login response: {e}"),
        })
    }

    /// `POST /{role}/refresh`, without a bearer header.
    pub(crate) async fn refresh(&self, role: Role) -> Result<RefreshGrant, MarketKitError> {
        let url = format!("{}/{role}/refresh", self.base_url);
        let response = self.request.handle(self.request.post(&url)).await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if let Some(reason) = blocked_reason(status, &body) {
            return Ok(RefreshGrant::Blocked(reason));
        }
        if !(200..300).contains(&status) {
            return Err(MarketKitError::NetworkError {
                url,
                status: Some(status),
                error: format!("refresh rejected: {body}"),
            });
        }

        let refreshed: RefreshResponse =
            serde_json::from_str(&body).map_err(|e| MarketKitError::SerializationError {
                error: format!("failed to parse refresh response: {e}"),
            })?;
        if !refreshed.active {
            return Ok(RefreshGrant::Blocked(refreshed.block_reason.unwrap_or_default()));
        }
        refreshed
            .access_token
            .map(|token| RefreshGrant::Token(token.into()))
            .ok_or_else(|| MarketKitError::SerializationError {
                error: "refresh response is missing accessToken".to_string(),
            })
    }
}
