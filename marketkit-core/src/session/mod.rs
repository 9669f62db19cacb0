//! The session: who is signed in, with which token, and whether the account
//! may still issue privileged requests.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use zeroize::Zeroize;

mod store;

pub use store::{CredentialStore, SessionObserver};

/// Role the account signed in as. Selects the role-specific auth endpoints.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
    uniffi::Enum,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Marketplace operator.
    Admin,
    /// Customer.
    User,
    /// Field inspector.
    Inspector,
}

/// Opaque bearer token. Redacted in `Debug` output and wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Returns the raw token. Treat as sensitive.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

impl Drop for AccessToken {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl From<String> for AccessToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AccessToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Snapshot of the signed-in state.
///
/// `authenticated()` is derived from the token, so it can never disagree
/// with it. A session with `account_active() == false` has every
/// non-allowlisted request rejected locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    access_token: Option<AccessToken>,
    role: Option<Role>,
    account_active: bool,
    block_reason: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            access_token: None,
            role: None,
            account_active: true,
            block_reason: None,
        }
    }
}

impl Session {
    pub(crate) const fn authenticated(token: AccessToken, role: Option<Role>) -> Self {
        Self {
            access_token: Some(token),
            role,
            account_active: true,
            block_reason: None,
        }
    }

    /// Current access token, if signed in.
    #[must_use]
    pub const fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }

    /// Role the session signed in as.
    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        self.role
    }

    /// Whether a token is held.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Whether the account may issue privileged requests.
    #[must_use]
    pub const fn account_active(&self) -> bool {
        self.account_active
    }

    /// Reason the account was blocked, if it is.
    #[must_use]
    pub fn block_reason(&self) -> Option<&str> {
        self.block_reason.as_deref()
    }

    pub(crate) fn block(&mut self, reason: String) {
        self.account_active = false;
        self.block_reason = Some(reason);
    }

    pub(crate) fn replace_token(&mut self, token: AccessToken) {
        self.access_token = Some(token);
    }

    /// Whether anything distinguishes this session from an empty one.
    pub(crate) const fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.account_active
    }
}
