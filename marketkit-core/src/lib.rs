//! Session and realtime notification core for MarketKit clients.
//!
//! Start with [`MarketClient`].

use strum::EnumString;

/// Hosted backend a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum, EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    /// Pre-production.
    Staging,
    /// Live.
    Production,
}

mod auth;
pub use auth::LoginCredentials;

mod client;
pub use client::MarketClient;

pub mod config;
pub use config::{ClientConfig, ReconnectConfig};

mod error;
pub use error::*;

pub mod events;
pub mod gateway;
pub mod ledger;
pub mod logger;
pub mod realtime;
pub mod refresh;
pub mod session;
pub mod storage;

// private modules
mod http_request;

uniffi::setup_scaffolding!("marketkit_core");

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::from_str("staging").unwrap(), Environment::Staging);
        assert_eq!(Environment::Production.to_string(), "production");
        assert!(Environment::from_str("dev").is_err());
    }
}
