//! The realtime channel manager.
//!
//! Follows the session once started: a token appearing opens an authenticated
//! socket, a cleared session tears it down. Everything the socket reports is
//! routed through [`ChannelState`] transitions and into the ledger, the
//! credential store, and the event bus. Signals from a torn-down connection
//! carry an old generation number and are dropped.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    config::{ClientConfig, ReconnectConfig},
    error::MarketKitError,
    events::{Alert, AlertAction, AlertLevel, EventBus, Route},
    ledger::{Notification, NotificationLedger},
    session::{AccessToken, CredentialStore, Session, SessionObserver},
};

mod frames;
mod socket;
mod state;

pub use frames::{BlockedPush, ClientFrame, ServerFrame};
use socket::Signal;
pub use state::ChannelState;
use state::Transition;

#[derive(Default)]
struct Link {
    /// Set by `start`, cleared by `stop`.
    enabled: bool,
    generation: u64,
    /// Store epoch the connection belongs to.
    epoch: u64,
    opened_with: Option<AccessToken>,
    /// Events may have been missed since the last connection of this session.
    gap: bool,
    outbound: Option<mpsc::UnboundedSender<ClientFrame>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    me: Weak<Inner>,
    url: String,
    policy: ReconnectConfig,
    redirect_delay: Duration,
    store: Arc<CredentialStore>,
    ledger: Arc<NotificationLedger>,
    events: EventBus,
    link: Mutex<Link>,
    state: watch::Sender<ChannelState>,
}

/// Handle to the realtime channel.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

impl RealtimeChannel {
    pub(crate) fn new(
        config: &ClientConfig,
        store: Arc<CredentialStore>,
        ledger: Arc<NotificationLedger>,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            url: config.realtime_url.clone(),
            policy: config.reconnect.clone(),
            redirect_delay: config.blocked_redirect_delay(),
            store,
            ledger,
            events,
            link: Mutex::new(Link::default()),
            state,
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner.store.add_observer(weak);
        Self { inner }
    }

    /// Starts following the session. Connects right away if a token is present.
    ///
    /// Also the way back after the channel gave up reconnecting or had its
    /// token rejected: a disconnected channel retries with the current token.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        {
            let mut link = self.inner.lock_link();
            link.enabled = true;
            if self.state() == ChannelState::Disconnected {
                link.opened_with = None;
            }
        }
        self.inner.sync(&self.inner.store.read());
    }

    /// Closes the connection and stops following the session.
    pub fn stop(&self) {
        let mut link = self.inner.lock_link();
        link.enabled = false;
        self.inner.teardown(&mut link);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// Receiver that always holds the latest connection state.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionObserver for Inner {
    fn on_session_changed(&self, session: &Session) {
        self.sync(session);
    }
}

impl Inner {
    fn sync(&self, session: &Session) {
        let mut link = self.lock_link();
        match session.access_token() {
            None => {
                self.teardown(&mut link);
                link.gap = false;
                drop(link);
                self.ledger.reset();
            }
            Some(token) if link.enabled => {
                let idle = *self.state.borrow() == ChannelState::Disconnected;
                if idle && link.opened_with.as_ref() != Some(token) {
                    self.open(&mut link, token.clone());
                }
            }
            Some(_) => {}
        }
    }

    fn open(&self, link: &mut Link, token: AccessToken) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("realtime: no async runtime, channel not opened");
            return;
        };

        link.generation += 1;
        let generation = link.generation;
        link.epoch = self.store.snapshot().1;
        link.opened_with = Some(token);
        let (outbound, receiver) = mpsc::unbounded_channel();
        link.outbound = Some(outbound);
        self.transition(Transition::Open);

        let tokens = self.me.clone();
        let current_token = move || {
            tokens
                .upgrade()
                .and_then(|inner| inner.store.read().access_token().cloned())
        };
        let owner = self.me.clone();
        let emit = move |signal: Signal| {
            owner
                .upgrade()
                .is_some_and(|inner| inner.handle(generation, signal))
        };
        link.task = Some(runtime.spawn(socket::run(
            self.url.clone(),
            self.policy.clone(),
            current_token,
            emit,
            receiver,
        )));
        log::debug!("realtime: opened generation {generation}");
    }

    fn teardown(&self, link: &mut Link) {
        link.generation += 1;
        link.opened_with = None;
        link.outbound = None;
        if let Some(task) = link.task.take() {
            task.abort();
        }
        match self.transition(Transition::Close) {
            Some(ChannelState::Disconnected) | None => {}
            Some(left) => {
                link.gap |= left == ChannelState::Connected;
                log::info!("realtime: disconnected");
            }
        }
    }

    /// Applies one signal from the socket. Returns `false` if it came from a
    /// connection that has since been torn down.
    fn handle(&self, generation: u64, signal: Signal) -> bool {
        let mut link = self.lock_link();
        if link.generation != generation {
            log::debug!("realtime: dropping signal from generation {generation}");
            return false;
        }

        match signal {
            Signal::Established => {
                if let Some(left) = self.transition(Transition::Established) {
                    if link.gap || left.resumes_after_gap() {
                        link.gap = false;
                        self.catch_up(link.outbound.as_ref());
                    }
                }
            }
            Signal::Frame(ServerFrame::Notification(notification)) => self.on_live(notification),
            Signal::Frame(ServerFrame::PendingNotifications(batch)) => self.on_batch(batch),
            Signal::Frame(ServerFrame::AccountBlocked(push)) => {
                let epoch = link.epoch;
                drop(link);
                self.on_blocked(epoch, push.reason);
            }
            Signal::Frame(ServerFrame::Error(payload)) => {
                let message = ServerFrame::error_text(&payload);
                log::warn!("realtime: server error: {message}");
                self.events
                    .alert(Alert::new(AlertLevel::Warning, "Realtime error", message));
            }
            Signal::Lost(reason) => {
                let err = MarketKitError::TransportError { error: reason };
                if self.transition(Transition::Lost) == Some(ChannelState::Connected) {
                    link.gap = true;
                    log::warn!("realtime: connection lost: {err}");
                    self.events.alert(Alert::new(
                        AlertLevel::Warning,
                        "Connection lost",
                        "Reconnecting to live updates.",
                    ));
                } else {
                    log::debug!("realtime: attempt failed: {err}");
                }
            }
            Signal::Rejected(status) => {
                log::warn!("realtime: token rejected ({status}), waiting for a new one");
                self.transition(Transition::Close);
            }
            Signal::Exhausted => {
                self.transition(Transition::Close);
                self.events.alert(Alert::new(
                    AlertLevel::Warning,
                    "Live updates unavailable",
                    "Could not reconnect to the server.",
                ));
            }
        }
        true
    }

    /// After a gap: ask for what was missed and stop trusting the local counter.
    fn catch_up(&self, outbound: Option<&mpsc::UnboundedSender<ClientFrame>>) {
        log::info!("realtime: reconnected, requesting pending notifications");
        if let Some(outbound) = outbound {
            let _ = outbound.send(ClientFrame::GetPendingNotifications);
        }
        self.resync_unread();
    }

    fn resync_unread(&self) {
        let ledger = Arc::clone(&self.ledger);
        tokio::spawn(async move {
            if let Err(err) = ledger.sync_unread_count().await {
                log::warn!("realtime: unread count resync failed: {err}");
            }
        });
    }

    fn on_live(&self, notification: Notification) {
        let id = notification.id.clone();
        let alert = Alert::new(
            AlertLevel::Info,
            notification.title.clone(),
            notification.message.clone(),
        )
        .with_action(AlertAction::MarkRead {
            notification_id: id.clone(),
        });
        if self.ledger.insert(notification) {
            self.events.alert(alert);
        } else {
            log::debug!("realtime: notification {id} already known");
        }
    }

    fn on_batch(&self, batch: Vec<Notification>) {
        let added = self.ledger.merge(batch);
        if added.is_empty() {
            return;
        }
        let message = match added.len() {
            1 => "You have 1 new notification.".to_string(),
            n => format!("You have {n} new notifications."),
        };
        self.events
            .alert(Alert::new(AlertLevel::Info, "While you were away", message));
        // The replay may land after the first resync; re-read so the backend wins.
        self.resync_unread();
    }

    fn on_blocked(&self, epoch: u64, reason: String) {
        if !self.store.set_blocked_in(epoch, reason.clone()) {
            log::debug!("realtime: block push for an already blocked or replaced session");
            return;
        }
        self.events
            .alert(Alert::new(AlertLevel::Terminal, "Account blocked", reason));

        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let delay = self.redirect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let session = store.read();
            if session.is_authenticated() && !session.account_active() {
                events.navigate(Route::Blocked);
            }
        });
    }

    /// Moves the state machine. Returns the state it left, if the transition applied.
    fn transition(&self, transition: Transition) -> Option<ChannelState> {
        let mut left = None;
        self.state.send_if_modified(|state| match state.next(transition) {
            Some(next) => {
                left = Some(*state);
                let changed = *state != next;
                *state = next;
                changed
            }
            None => false,
        });
        left
    }

    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
