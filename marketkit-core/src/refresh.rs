//! Single-flight token refresh.
//!
//! However many requests see an expired token at once, at most one refresh
//! call is in flight. Callers arriving while it runs subscribe to the same
//! shared future and receive the same outcome. A caller arriving after it
//! resolved sees that the session token already moved on and reuses it
//! instead of starting another refresh.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::{
    auth::{AuthApi, RefreshGrant},
    error::MarketKitError,
    events::{Alert, AlertLevel, EventBus, Route},
    session::{AccessToken, CredentialStore, Role},
};

/// Outcome shared by every subscriber of one refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RefreshFailure {
    Expired,
    Blocked(String),
}

impl From<RefreshFailure> for MarketKitError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Expired => Self::SessionExpired,
            RefreshFailure::Blocked(reason) => Self::AccountBlocked { reason },
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<AccessToken, RefreshFailure>>>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
    subscribers: usize,
}

/// Coordinates token refreshes so that at most one runs at a time.
pub struct RefreshCoordinator {
    auth: AuthApi,
    store: Arc<CredentialStore>,
    events: EventBus,
    timeout: Duration,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
    calls: AtomicU64,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        auth: AuthApi,
        store: Arc<CredentialStore>,
        events: EventBus,
        timeout: Duration,
    ) -> Self {
        Self {
            auth,
            store,
            events,
            timeout,
            in_flight: Mutex::new(None),
            next_id: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Obtains a token newer than `stale`.
    ///
    /// Joins the running refresh if there is one. Otherwise, if the session
    /// already holds a different token, returns it without calling the
    /// backend; if the session holds no token, fails without calling it.
    ///
    /// # Errors
    ///
    /// - [`MarketKitError::SessionExpired`] if the refresh failed, timed out,
    ///   or the session was cleared meanwhile. The session is cleared.
    /// - [`MarketKitError::AccountBlocked`] if the backend reports the account
    ///   as inactive. The session is marked blocked.
    pub async fn refresh(
        self: &Arc<Self>,
        stale: &AccessToken,
    ) -> Result<AccessToken, MarketKitError> {
        let future = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(op) = slot.as_mut() {
                op.subscribers += 1;
                log::debug!("joining refresh #{} ({} waiting)", op.id, op.subscribers);
                op.future.clone()
            } else {
                let (session, epoch) = self.store.snapshot();
                let Some(current) = session.access_token() else {
                    return Err(MarketKitError::SessionExpired);
                };
                if current != stale {
                    return Ok(current.clone());
                }
                let Some(role) = session.role() else {
                    log::warn!("cannot refresh a session without a role");
                    return Err(self.expire(epoch).into());
                };

                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let this = Arc::clone(self);
                let future = async move { this.run(id, role, epoch).await }
                    .boxed()
                    .shared();
                *slot = Some(InFlight {
                    id,
                    future: future.clone(),
                    subscribers: 1,
                });
                future
            }
        };
        future.await.map_err(Into::into)
    }

    /// Number of refresh calls sent to the backend so far.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of callers waiting on the running refresh, if one is running.
    #[must_use]
    pub fn subscribers(&self) -> Option<usize> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|op| op.subscribers)
    }

    async fn run(
        self: Arc<Self>,
        id: u64,
        role: Role,
        epoch: u64,
    ) -> Result<AccessToken, RefreshFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        log::debug!("refresh #{id} started for {role}");

        let outcome = match tokio::time::timeout(self.timeout, self.auth.refresh(role)).await {
            Err(_) => {
                log::warn!("refresh #{id} timed out after {:?}", self.timeout);
                Err(self.expire(epoch))
            }
            Ok(Err(err)) => {
                log::warn!("refresh #{id} failed: {err}");
                Err(self.expire(epoch))
            }
            Ok(Ok(RefreshGrant::Blocked(reason))) => {
                if self.store.set_blocked_in(epoch, reason.clone()) {
                    self.events.navigate(Route::Blocked);
                }
                Err(RefreshFailure::Blocked(reason))
            }
            Ok(Ok(RefreshGrant::Token(token))) => {
                if self.store.apply_refresh(epoch, token.clone()) {
                    log::debug!("refresh #{id} succeeded");
                    Ok(token)
                } else {
                    Err(RefreshFailure::Expired)
                }
            }
        };

        // Retire the operation before the outcome fans out, so later callers
        // compare against the updated session instead of joining a finished refresh.
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|op| op.id == id) {
            *slot = None;
        }
        outcome
    }

    fn expire(&self, epoch: u64) -> RefreshFailure {
        if self.store.clear_in(epoch) {
            self.events.alert(Alert::new(
                AlertLevel::Terminal,
                "Session expired",
                "Please sign in again.",
            ));
            self.events.navigate(Route::Login);
        }
        RefreshFailure::Expired
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("timeout", &self.timeout)
            .field("calls", &self.calls())
            .field("subscribers", &self.subscribers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::join_all;
    use mockito::Server;
    use tokio::net::TcpListener;

    use super::*;
    use crate::{events::ClientEvent, http_request::Request, storage::MemoryStore};

    fn coordinator(base_url: &str, timeout: Duration) -> (Arc<CredentialStore>, EventBus, Arc<RefreshCoordinator>) {
        let store = Arc::new(CredentialStore::hydrate(Arc::new(MemoryStore::new())).unwrap());
        let events = EventBus::new();
        let auth = AuthApi::new(base_url, Request::new(Duration::from_secs(5)).unwrap());
        let coordinator = Arc::new(RefreshCoordinator::new(
            auth,
            store.clone(),
            events.clone(),
            timeout,
        ));
        (store, events, coordinator)
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/user/refresh")
            .with_status(200)
            .with_body(r#"{"accessToken": "tok-2", "active": true}"#)
            .expect(1)
            .create_async()
            .await;

        let (store, _, coordinator) = coordinator(&server.url(), Duration::from_secs(5));
        store.login("tok-1", Role::User).unwrap();
        let stale = AccessToken::from("tok-1");

        let results = join_all((0..8).map(|_| coordinator.refresh(&stale))).await;

        mock.assert_async().await;
        assert_eq!(coordinator.calls(), 1);
        assert!(coordinator.subscribers().is_none());
        for result in results {
            assert_eq!(result.unwrap().as_str(), "tok-2");
        }
        assert_eq!(
            store.read().access_token().map(AccessToken::as_str),
            Some("tok-2")
        );
    }

    #[tokio::test]
    async fn test_late_caller_reuses_new_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/user/refresh")
            .with_status(200)
            .with_body(r#"{"accessToken": "tok-2", "active": true}"#)
            .expect(1)
            .create_async()
            .await;

        let (store, _, coordinator) = coordinator(&server.url(), Duration::from_secs(5));
        store.login("tok-1", Role::User).unwrap();
        let stale = AccessToken::from("tok-1");

        coordinator.refresh(&stale).await.unwrap();
        let again = coordinator.refresh(&stale).await.unwrap();

        mock.assert_async().await;
        assert_eq!(again.as_str(), "tok-2");
    }

    #[tokio::test]
    async fn test_failure_clears_session_and_navigates_once() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/user/refresh")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let (store, events, coordinator) = coordinator(&server.url(), Duration::from_secs(5));
        let mut listener = events.subscribe();
        store.login("tok-1", Role::User).unwrap();
        let stale = AccessToken::from("tok-1");

        let results = join_all((0..3).map(|_| coordinator.refresh(&stale))).await;
        for result in results {
            assert!(matches!(result, Err(MarketKitError::SessionExpired)));
        }
        assert!(!store.read().is_authenticated());

        let mut navigations = 0;
        while let Ok(event) = listener.try_recv() {
            if event == ClientEvent::Navigate(Route::Login) {
                navigations += 1;
            }
        }
        assert_eq!(navigations, 1);
    }

    #[tokio::test]
    async fn test_no_refresh_for_cleared_session() {
        let server = Server::new_async().await;
        let (_, _, coordinator) = coordinator(&server.url(), Duration::from_secs(5));

        let err = coordinator.refresh(&AccessToken::from("tok-1")).await.unwrap_err();
        assert!(matches!(err, MarketKitError::SessionExpired));
        assert_eq!(coordinator.calls(), 0);
    }

    #[tokio::test]
    async fn test_inactive_account_blocks_instead_of_expiring() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/inspector/refresh")
            .with_status(200)
            .with_body(r#"{"active": false, "blockReason": "license expired"}"#)
            .create_async()
            .await;

        let (store, _, coordinator) = coordinator(&server.url(), Duration::from_secs(5));
        store.login("tok-1", Role::Inspector).unwrap();

        let err = coordinator.refresh(&AccessToken::from("tok-1")).await.unwrap_err();
        assert!(
            matches!(err, MarketKitError::AccountBlocked { ref reason } if reason == "license expired")
        );
        let session = store.read();
        assert!(session.is_authenticated());
        assert!(!session.account_active());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        // Accepts connections and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let (store, _, coordinator) =
            coordinator(&format!("http://{addr}"), Duration::from_millis(100));
        store.login("tok-1", Role::User).unwrap();

        let err = coordinator.refresh(&AccessToken::from("tok-1")).await.unwrap_err();
        assert!(matches!(err, MarketKitError::SessionExpired));
        assert!(!store.read().is_authenticated());
    }

    #[tokio::test]
    async fn test_clear_during_refresh_is_not_resurrected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = release_rx.await;
            let body = r#"{"accessToken": "tok-2", "active": true}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });

        let (store, _, coordinator) = coordinator(&format!("http://{addr}"), Duration::from_secs(5));
        store.login("tok-1", Role::User).unwrap();

        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh(&AccessToken::from("tok-1")).await })
        };
        while coordinator.subscribers().is_none() {
            tokio::task::yield_now().await;
        }
        store.clear();
        release_tx.send(()).unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(MarketKitError::SessionExpired)));
        assert!(!store.read().is_authenticated());
    }
}
