//! JSON frames exchanged over the realtime socket: `{"event": ..., "data": ...}`.

use serde::{Deserialize, Serialize};

use crate::ledger::Notification;

/// Payload of an `account:blocked` push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedPush {
    /// Why the account was suspended.
    #[serde(default)]
    pub reason: String,
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerFrame {
    /// One live notification.
    #[serde(rename = "notification")]
    Notification(Notification),
    /// Notifications generated while the client was disconnected.
    #[serde(rename = "pending-notifications")]
    PendingNotifications(Vec<Notification>),
    /// The account was suspended.
    #[serde(rename = "account:blocked")]
    AccountBlocked(BlockedPush),
    /// Server-side error report.
    #[serde(rename = "error")]
    Error(serde_json::Value),
}

impl ServerFrame {
    /// Human-readable text of an `error` payload, which may be a string or an object.
    pub(crate) fn error_text(payload: &serde_json::Value) -> String {
        payload
            .as_str()
            .or_else(|| payload.get("message").and_then(serde_json::Value::as_str))
            .map_or_else(|| payload.to_string(), ToString::to_string)
    }
}

/// Client-to-server requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    /// Ask the server to replay what was missed.
    #[serde(rename = "get-pending-notifications")]
    GetPendingNotifications,
}
