//! Fixed keys under which the session is persisted.

use crate::session::{Role, Session};

use super::error::{StorageError, StorageResult};
use super::traits::{KeyValueStore, KeyWrite};

pub(crate) const ACCESS_TOKEN_KEY: &str = "session.access_token";
pub(crate) const ROLE_KEY: &str = "session.role";
pub(crate) const ACCOUNT_ACTIVE_KEY: &str = "session.account_active";
pub(crate) const BLOCK_REASON_KEY: &str = "session.block_reason";

/// Every key owned by the session, in the order they are written.
pub(crate) const SESSION_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    ROLE_KEY,
    ACCOUNT_ACTIVE_KEY,
    BLOCK_REASON_KEY,
];

/// Loads a persisted session.
///
/// A missing token yields an empty session even if other keys linger.
pub(crate) fn load_session(store: &dyn KeyValueStore) -> StorageResult<Session> {
    let Some(token) = store.get(ACCESS_TOKEN_KEY.to_string())? else {
        return Ok(Session::default());
    };
    let role = store
        .get(ROLE_KEY.to_string())?
        .map(|raw| {
            raw.parse::<Role>().map_err(|_| StorageError::InvalidValue {
                key: ROLE_KEY.to_string(),
                reason: format!("unknown role `{raw}`"),
            })
        })
        .transpose()?;
    let account_active = match store.get(ACCOUNT_ACTIVE_KEY.to_string())?.as_deref() {
        None | Some("true") => true,
        Some("false") => false,
        Some(other) => {
            return Err(StorageError::InvalidValue {
                key: ACCOUNT_ACTIVE_KEY.to_string(),
                reason: format!("expected a boolean, got `{other}`"),
            })
        }
    };
    let block_reason = store.get(BLOCK_REASON_KEY.to_string())?;

    let mut session = Session::authenticated(token.into(), role);
    if !account_active {
        session.block(block_reason.unwrap_or_default());
    }
    Ok(session)
}

/// Builds the batch that persists `session`, removing keys it does not use.
pub(crate) fn session_writes(session: &Session) -> Vec<KeyWrite> {
    let Some(token) = session.access_token() else {
        return clear_writes();
    };
    vec![
        KeyWrite::put(ACCESS_TOKEN_KEY, token.as_str()),
        KeyWrite {
            key: ROLE_KEY.to_string(),
            value: session.role().map(|role| role.to_string()),
        },
        KeyWrite::put(ACCOUNT_ACTIVE_KEY, session.account_active().to_string()),
        KeyWrite {
            key: BLOCK_REASON_KEY.to_string(),
            value: session.block_reason().map(ToString::to_string),
        },
    ]
}

/// Builds the batch that erases every session key.
pub(crate) fn clear_writes() -> Vec<KeyWrite> {
    SESSION_KEYS.iter().map(|key| KeyWrite::remove(*key)).collect()
}
