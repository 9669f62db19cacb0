//! The notification ledger: ordered, deduplicated notifications and the unread count.
//!
//! Fed by the realtime channel (live events and replays) and by explicit
//! fetches; mutated by the user through `mark_read`/`mark_all_read`. Marking
//! is optimistic: the local state changes first and stays changed even if the
//! backend acknowledgement fails, in which case the discrepancy is logged.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;
use tokio::sync::watch;

use crate::{
    error::MarketKitError,
    gateway::{ApiRequest, RequestGateway},
};

pub(crate) mod state;

use state::LedgerState;
pub use state::Notification;

/// Totals published to ledger subscribers after every change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, uniffi::Record)]
pub struct LedgerSummary {
    /// Number of notifications held.
    pub total: u32,
    /// Unread count.
    pub unread: u32,
}

/// Whether the backend confirmed an optimistic update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum Acknowledgement {
    /// The backend accepted the change.
    Confirmed,
    /// The backend did not accept it; the local change was kept anyway.
    Unconfirmed,
}

#[derive(Debug, Deserialize)]
struct UnreadCount {
    count: u32,
}

/// Client-side record of notifications.
pub struct NotificationLedger {
    state: RwLock<LedgerState>,
    gateway: Arc<RequestGateway>,
    summary: watch::Sender<LedgerSummary>,
}

impl NotificationLedger {
    pub(crate) fn new(gateway: Arc<RequestGateway>) -> Self {
        let (summary, _) = watch::channel(LedgerSummary::default());
        Self {
            state: RwLock::new(LedgerState::default()),
            gateway,
            summary,
        }
    }

    /// Notifications, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<Notification> {
        self.read_state().entries().to_vec()
    }

    /// Current unread count.
    #[must_use]
    pub fn unread_count(&self) -> u32 {
        self.read_state().unread()
    }

    /// Receiver that always holds the latest totals.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LedgerSummary> {
        self.summary.subscribe()
    }

    /// Records a single live notification. Returns `false` if it was already known.
    pub fn insert(&self, notification: Notification) -> bool {
        self.update(|state| state.insert(notification))
    }

    /// Merges a batch by id and returns the notifications that were new.
    pub fn merge(&self, batch: Vec<Notification>) -> Vec<Notification> {
        self.update(|state| state.merge(batch))
    }

    /// Forgets every notification. Used when the session ends.
    pub(crate) fn reset(&self) {
        self.update(|state| state.replace(Vec::new()));
    }

    /// Loads the notification list from the backend, replacing the local one.
    ///
    /// # Errors
    ///
    /// Returns gateway errors, [`MarketKitError::Api`] for an error status,
    /// or [`MarketKitError::SerializationError`] for an unexpected body.
    pub async fn fetch(&self) -> Result<Vec<Notification>, MarketKitError> {
        let list: Vec<Notification> = self
            .gateway
            .send(ApiRequest::get("/notifications"))
            .await?
            .error_for_status()?
            .json()?;
        self.update(|state| state.replace(list));
        Ok(self.list())
    }

    /// Re-reads the unread count from the backend instead of trusting the
    /// local counter.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch`].
    pub async fn sync_unread_count(&self) -> Result<u32, MarketKitError> {
        let UnreadCount { count } = self
            .gateway
            .send(ApiRequest::get("/notifications/unread-count"))
            .await?
            .error_for_status()?
            .json()?;
        self.update(|state| state.set_unread(count));
        Ok(count)
    }

    /// Marks one notification read, locally first, then on the backend.
    pub async fn mark_read(&self, id: &str) -> Acknowledgement {
        self.update(|state| state.mark_read(id));
        let request = ApiRequest::patch(format!("/notifications/{id}/read"));
        self.acknowledge(request, &format!("mark {id} read")).await
    }

    /// Marks every notification read, locally first, then on the backend.
    pub async fn mark_all_read(&self) -> Acknowledgement {
        self.update(LedgerState::mark_all_read);
        let request = ApiRequest::patch("/notifications/read-all");
        self.acknowledge(request, "mark all read").await
    }

    async fn acknowledge(&self, request: ApiRequest, what: &str) -> Acknowledgement {
        match self.gateway.send(request).await.and_then(|r| r.error_for_status()) {
            Ok(_) => Acknowledgement::Confirmed,
            Err(err) => {
                log::warn!("backend did not acknowledge {what}, keeping local state: {err}");
                Acknowledgement::Unconfirmed
            }
        }
    }

    fn update<R>(&self, apply: impl FnOnce(&mut LedgerState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let result = apply(&mut state);
        let summary = LedgerSummary {
            total: u32::try_from(state.entries().len()).unwrap_or(u32::MAX),
            unread: state.unread(),
        };
        self.summary.send_if_modified(|current| {
            let changed = *current != summary;
            *current = summary;
            changed
        });
        result
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for NotificationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationLedger")
            .field("summary", &*self.summary.borrow())
            .finish_non_exhaustive()
    }
}
