//! Events the core raises for the host UI: alerts to show and views to navigate to.

use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Severity of an [`Alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum AlertLevel {
    /// Informational, e.g. a new notification.
    Info,
    /// Transient problem, dismissible, no state change.
    Warning,
    /// The session ended; the user must act.
    Terminal,
}

/// Action offered alongside an alert.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum AlertAction {
    /// Mark the notification with this id as read.
    MarkRead {
        /// Notification id.
        notification_id: String,
    },
}

/// User-facing alert.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct Alert {
    /// Severity.
    pub level: AlertLevel,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Optional action bound to the alert.
    pub action: Option<AlertAction>,
}

impl Alert {
    pub(crate) fn new(level: AlertLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            action: None,
        }
    }

    pub(crate) fn with_action(mut self, action: AlertAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// Views the core can force the host into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum Route {
    /// Terminal view for suspended accounts.
    Blocked,
    /// Sign-in view, after the session expired.
    Login,
}

/// Everything published on the [`EventBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Show an alert.
    Alert(Alert),
    /// Navigate to a view.
    Navigate(Route),
}

/// Fan-out of [`ClientEvent`]s to any number of host listeners.
///
/// Publishing never blocks and never fails; events published while nobody
/// listens are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Registers a new listener. It only receives events published afterwards.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn alert(&self, alert: Alert) {
        let _ = self.sender.send(ClientEvent::Alert(alert));
    }

    pub(crate) fn navigate(&self, route: Route) {
        log::debug!("navigating to {route:?}");
        let _ = self.sender.send(ClientEvent::Navigate(route));
    }
}
