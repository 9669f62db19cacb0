//! The credential store: single owner of the [`Session`].
//!
//! Every mutation goes through a named operation that swaps the whole session
//! under a write lock, persists it, and then notifies subscribers before
//! returning. Readers never see a half-applied write.
//!
//! Each login and each clear starts a new *epoch*. Operations that began
//! under an older epoch (a refresh started before a logout, say) are rejected
//! when they try to write back, so a cleared session cannot be resurrected.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tokio::sync::watch;

use super::{AccessToken, Role, Session};
use crate::storage::keys::{clear_writes, load_session, session_writes};
use crate::storage::{KeyValueStore, StorageResult};

/// Synchronous observer of session changes.
///
/// Called after every successful write, outside the store's locks.
/// Implementations must not block; writing back to the store from the
/// callback is allowed.
pub trait SessionObserver: Send + Sync {
    /// Receives the session as it is right after the write.
    fn on_session_changed(&self, session: &Session);
}

#[derive(Debug)]
struct StoreState {
    session: Session,
    epoch: u64,
}

/// Holds the current session and funnels every write through named operations.
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStore>,
    state: RwLock<StoreState>,
    changes: watch::Sender<Session>,
    observers: Mutex<Vec<Weak<dyn SessionObserver>>>,
}

impl CredentialStore {
    /// Creates a store hydrated from `storage`.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted session cannot be read.
    pub fn hydrate(storage: Arc<dyn KeyValueStore>) -> StorageResult<Self> {
        let session = load_session(storage.as_ref())?;
        if session.is_authenticated() {
            log::debug!(
                "hydrated session (role: {:?}, active: {})",
                session.role(),
                session.account_active()
            );
        }
        let (changes, _) = watch::channel(session.clone());
        Ok(Self {
            storage,
            state: RwLock::new(StoreState { session, epoch: 0 }),
            changes,
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Returns the latest session.
    #[must_use]
    pub fn read(&self) -> Session {
        self.read_state().session.clone()
    }

    /// Returns the latest session together with its epoch.
    pub(crate) fn snapshot(&self) -> (Session, u64) {
        let state = self.read_state();
        (state.session.clone(), state.epoch)
    }

    /// Receiver that always holds the latest session.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.changes.subscribe()
    }

    /// Registers a synchronous observer. Dropped observers are pruned lazily.
    pub fn add_observer(&self, observer: Weak<dyn SessionObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Signs in: replaces the session with an active one holding `token`.
    ///
    /// The token and role are persisted before the session is swapped, so a
    /// failed write leaves the previous session untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the session could not be persisted.
    pub fn login(&self, token: impl Into<AccessToken>, role: Role) -> StorageResult<()> {
        let session = Session::authenticated(token.into(), Some(role));
        {
            let mut state = self.write_state();
            self.storage.write_batch(session_writes(&session))?;
            state.session = session.clone();
            state.epoch += 1;
            self.changes.send_replace(session.clone());
        }
        log::info!("signed in as {role}");
        self.notify(&session);
        Ok(())
    }

    /// Marks the account as blocked.
    ///
    /// Returns `true` only for the call that performed the transition, so
    /// callers can use it to trigger one-shot side effects.
    pub fn set_blocked(&self, reason: impl Into<String>) -> bool {
        self.block(None, reason.into())
    }

    /// Like [`Self::set_blocked`], but only if the session is still in `epoch`.
    pub(crate) fn set_blocked_in(&self, epoch: u64, reason: impl Into<String>) -> bool {
        self.block(Some(epoch), reason.into())
    }

    /// Installs a refreshed token if the session is still the one the refresh
    /// started from. Returns `false` for a stale write, which is discarded.
    pub(crate) fn apply_refresh(&self, epoch: u64, token: AccessToken) -> bool {
        let session = {
            let mut state = self.write_state();
            if state.epoch != epoch || !state.session.is_authenticated() {
                log::debug!("discarding refreshed token for a cleared session");
                return false;
            }
            state.session.replace_token(token);
            if let Err(err) = self.storage.write_batch(session_writes(&state.session)) {
                log::warn!("failed to persist refreshed token: {err}");
            }
            self.changes.send_replace(state.session.clone());
            state.session.clone()
        };
        self.notify(&session);
        true
    }

    /// Signs out: erases the session in memory and in storage.
    ///
    /// Returns `true` if there was anything to clear.
    pub fn clear(&self) -> bool {
        self.clear_at(None)
    }

    /// Like [`Self::clear`], but only if the session is still in `epoch`.
    pub(crate) fn clear_in(&self, epoch: u64) -> bool {
        self.clear_at(Some(epoch))
    }

    fn block(&self, epoch: Option<u64>, reason: String) -> bool {
        let session = {
            let mut state = self.write_state();
            if epoch.is_some_and(|epoch| epoch != state.epoch) {
                return false;
            }
            if !state.session.account_active() {
                return false;
            }
            state.session.block(reason);
            if let Err(err) = self.storage.write_batch(session_writes(&state.session)) {
                log::warn!("failed to persist block status: {err}");
            }
            self.changes.send_replace(state.session.clone());
            state.session.clone()
        };
        log::warn!(
            "account blocked: {}",
            session.block_reason().unwrap_or_default()
        );
        self.notify(&session);
        true
    }

    fn clear_at(&self, epoch: Option<u64>) -> bool {
        let session = {
            let mut state = self.write_state();
            if epoch.is_some_and(|epoch| epoch != state.epoch) {
                return false;
            }
            if state.session.is_empty() {
                return false;
            }
            state.session = Session::default();
            state.epoch += 1;
            if let Err(err) = self.storage.write_batch(clear_writes()) {
                log::warn!("failed to erase persisted session: {err}");
            }
            self.changes.send_replace(state.session.clone());
            state.session.clone()
        };
        log::info!("session cleared");
        self.notify(&session);
        true
    }

    /// Runs the synchronous observers. The watch channel is updated under the
    /// write lock instead, so it never goes back to an older session.
    fn notify(&self, session: &Session) {
        let observers: Vec<Arc<dyn SessionObserver>> = {
            let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
            observers.retain(|observer| observer.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.on_session_changed(session);
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("state", &*self.read_state())
            .finish_non_exhaustive()
    }
}
