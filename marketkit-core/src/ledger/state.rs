//! Pure ledger state: ordering, deduplication and the unread counter.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A notification as delivered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Server-assigned unique id.
    #[serde(alias = "_id")]
    pub id: String,
    /// Headline.
    #[serde(default)]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub message: String,
    /// Server timestamp.
    pub created_at: DateTime<Utc>,
    /// Whether the user has read it.
    #[serde(default)]
    pub is_read: bool,
}

/// Newest first; ties broken by id so the order is total.
fn newest_first(a: &Notification, b: &Notification) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Ordered, deduplicated notifications plus the unread counter.
///
/// Merges are idempotent: applying the same notifications twice leaves the
/// state unchanged, which is what makes a replay racing a live event safe.
#[derive(Debug, Default, Clone)]
pub(crate) struct LedgerState {
    entries: Vec<Notification>,
    ids: HashSet<String>,
    unread: u32,
}

impl LedgerState {
    pub(crate) fn entries(&self) -> &[Notification] {
        &self.entries
    }

    pub(crate) const fn unread(&self) -> u32 {
        self.unread
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Adds one notification. Returns `false` if its id is already known.
    pub(crate) fn insert(&mut self, notification: Notification) -> bool {
        let added = self.push(notification);
        if added {
            self.entries.sort_by(newest_first);
        }
        added
    }

    /// Adds every notification whose id is not yet known and returns the
    /// ones that were added.
    pub(crate) fn merge(&mut self, batch: Vec<Notification>) -> Vec<Notification> {
        let mut added = Vec::new();
        for notification in batch {
            if self.push(notification.clone()) {
                added.push(notification);
            }
        }
        if !added.is_empty() {
            self.entries.sort_by(newest_first);
        }
        added
    }

    /// Replaces the ledger with the server's list.
    pub(crate) fn replace(&mut self, list: Vec<Notification>) {
        *self = Self::default();
        for notification in list {
            self.push(notification);
        }
        self.entries.sort_by(newest_first);
    }

    /// Overrides the unread counter with the server's figure.
    pub(crate) fn set_unread(&mut self, unread: u32) {
        self.unread = unread;
    }

    /// Returns `true` if the notification existed and was unread.
    pub(crate) fn mark_read(&mut self, id: &str) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) else {
            return false;
        };
        if entry.is_read {
            return false;
        }
        entry.is_read = true;
        self.unread = self.unread.saturating_sub(1);
        true
    }

    /// Marks everything read and returns how many entries changed.
    pub(crate) fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|entry| !entry.is_read) {
            entry.is_read = true;
            changed += 1;
        }
        self.unread = 0;
        changed
    }

    fn push(&mut self, notification: Notification) -> bool {
        if !self.ids.insert(notification.id.clone()) {
            return false;
        }
        if !notification.is_read {
            self.unread = self.unread.saturating_add(1);
        }
        self.entries.push(notification);
        true
    }
}
