//! Client configuration: backend locations, timeouts and the blocked-account allowlist.

use std::time::Duration;

use serde::Deserialize;

use crate::{error::MarketKitError, Environment};

const DEFAULT_ALLOWLIST: [&str; 4] = ["/support", "/contact", "/status", "/logout"];

/// Reconnect policy of the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt, in milliseconds.
    pub min_delay_ms: u64,
    /// Upper bound on the delay between attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Attempts after which the channel gives up until the token changes.
    pub max_attempts: usize,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    pub(crate) const fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub(crate) const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Configuration of a [`crate::MarketClient`].
///
/// Every field has a default, so a JSON config only needs the fields it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the REST API, without a trailing slash.
    pub api_base_url: String,
    /// URL of the realtime WebSocket endpoint.
    pub realtime_url: String,
    /// Timeout for ordinary API requests, in milliseconds.
    pub request_timeout_ms: u64,
    /// Bound on a token refresh. Exceeding it counts as a failed refresh.
    pub refresh_timeout_ms: u64,
    /// Delay between the blocked-account alert and navigation to the blocked view.
    pub blocked_redirect_delay_ms: u64,
    /// Paths reachable while the account is blocked.
    pub allowlist: Vec<String>,
    /// Realtime reconnect policy.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_environment(&Environment::Production)
    }
}

impl ClientConfig {
    /// Returns the defaults for `environment`.
    #[must_use]
    pub fn from_environment(environment: &Environment) -> Self {
        let (api_base_url, realtime_url) = match environment {
            Environment::Staging => (
                "https://api.staging.marketkit.app",
                "wss://realtime.staging.marketkit.app/ws",
            ),
            Environment::Production => {
                ("https://api.marketkit.app", "wss://realtime.marketkit.app/ws")
            }
        };
        Self {
            api_base_url: api_base_url.to_string(),
            realtime_url: realtime_url.to_string(),
            request_timeout_ms: 10_000,
            refresh_timeout_ms: 10_000,
            blocked_redirect_delay_ms: 2_000,
            allowlist: DEFAULT_ALLOWLIST.iter().map(ToString::to_string).collect(),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Returns a config pointing both endpoints at a custom host, keeping
    /// every other default. Used for local backends and tests.
    #[must_use]
    pub fn with_base_urls(api_base_url: &str, realtime_url: &str) -> Self {
        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            realtime_url: realtime_url.to_string(),
            ..Self::default()
        }
    }

    /// Parses a config from JSON and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`MarketKitError::InvalidInput`] if the JSON is malformed or
    /// a URL has the wrong scheme.
    pub fn from_json(json: &str) -> Result<Self, MarketKitError> {
        let mut config: Self =
            serde_json::from_str(json).map_err(|e| MarketKitError::InvalidInput {
                attribute: "config".to_string(),
                reason: e.to_string(),
            })?;
        config.api_base_url = config.api_base_url.trim_end_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }

    /// Checks URL schemes.
    ///
    /// # Errors
    ///
    /// Returns [`MarketKitError::InvalidInput`] naming the offending field.
    pub fn validate(&self) -> Result<(), MarketKitError> {
        if !has_scheme(&self.api_base_url, &["http://", "https://"]) {
            return Err(MarketKitError::InvalidInput {
                attribute: "api_base_url".to_string(),
                reason: "expected an http(s) URL".to_string(),
            });
        }
        if !has_scheme(&self.realtime_url, &["ws://", "wss://"]) {
            return Err(MarketKitError::InvalidInput {
                attribute: "realtime_url".to_string(),
                reason: "expected a ws(s) URL".to_string(),
            });
        }
        Ok(())
    }

    /// Whether `path` stays reachable while the account is blocked.
    ///
    /// Query strings are ignored; a trailing slash is not significant.
    #[must_use]
    pub fn is_allowlisted(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or_default();
        let path = path.trim_end_matches('/');
        self.allowlist
            .iter()
            .any(|allowed| allowed.trim_end_matches('/') == path)
    }

    pub(crate) const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub(crate) const fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub(crate) const fn blocked_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.blocked_redirect_delay_ms)
    }
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    schemes.iter().any(|scheme| url.starts_with(scheme))
}
