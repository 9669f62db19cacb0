//! The request gateway: every API call made on behalf of the session goes through here.
//!
//! The transport call is wrapped by ordered hooks:
//!
//! 1. pre: reject non-allowlisted requests while the account is blocked;
//! 2. pre: attach the bearer token;
//! 3. post: an `ACCOUNT_BLOCKED` response blocks the session;
//! 4. post: a 401 triggers one coordinated refresh and one retry.
//!
//! Everything else, success or error status, is returned to the caller unchanged.

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;

use crate::{
    config::ClientConfig,
    error::MarketKitError,
    events::{EventBus, Route},
    http_request::Request,
    refresh::RefreshCoordinator,
    session::{AccessToken, CredentialStore, Session},
};

mod request;

pub(crate) use request::blocked_reason;
pub use request::{ApiRequest, ApiResponse, ACCOUNT_BLOCKED_CODE};
pub use reqwest::Method;

/// What the post-hooks make of a response.
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Pass,
    Blocked(String),
    Expired,
}

fn inspect(response: &ApiResponse) -> Verdict {
    if let Some(reason) = blocked_reason(response.status(), response.text()) {
        return Verdict::Blocked(reason);
    }
    if response.status() == 401 {
        return Verdict::Expired;
    }
    Verdict::Pass
}

/// Sends API requests with the session's credentials and enforces its rules.
pub struct RequestGateway {
    config: ClientConfig,
    http: Request,
    store: Arc<CredentialStore>,
    refresh: Arc<RefreshCoordinator>,
    events: EventBus,
}

impl RequestGateway {
    pub(crate) fn new(
        config: ClientConfig,
        http: Request,
        store: Arc<CredentialStore>,
        refresh: Arc<RefreshCoordinator>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            http,
            store,
            refresh,
            events,
        }
    }

    /// Sends `request` on behalf of the current session.
    ///
    /// # Errors
    ///
    /// - [`MarketKitError::AccountBlocked`] if the account is blocked and the
    ///   path is not allowlisted (nothing is sent), or if the backend reports
    ///   the suspension.
    /// - [`MarketKitError::SessionExpired`] if the token could not be
    ///   refreshed, or the retried request was rejected again.
    /// - [`MarketKitError::NetworkError`] if the request could not be sent.
    ///
    /// Other error statuses are not errors here; see [`ApiResponse::error_for_status`].
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, MarketKitError> {
        let (session, epoch) = self.store.snapshot();
        self.admit(&session, &request)?;

        let token = session.access_token().cloned();
        let response = self.dispatch(&request, token.as_ref()).await?;
        match inspect(&response) {
            Verdict::Pass => Ok(response),
            Verdict::Blocked(reason) => Err(self.blocked(epoch, reason)),
            // An anonymous 401 is an ordinary error status.
            Verdict::Expired => match token {
                None => Ok(response),
                Some(stale) => self.retry_after_refresh(&request, &stale, epoch).await,
            },
        }
    }

    /// Refreshes once and retries once. A second 401 is final.
    async fn retry_after_refresh(
        &self,
        request: &ApiRequest,
        stale: &AccessToken,
        epoch: u64,
    ) -> Result<ApiResponse, MarketKitError> {
        log::debug!("{} {} expired, refreshing", request.method(), request.path());
        let fresh = self.refresh.refresh(stale).await?;
        // The account may have been blocked while the refresh ran.
        self.admit(&self.store.read(), request)?;

        let response = self.dispatch(request, Some(&fresh)).await?;
        match inspect(&response) {
            Verdict::Pass => Ok(response),
            Verdict::Blocked(reason) => Err(self.blocked(epoch, reason)),
            Verdict::Expired => {
                log::warn!(
                    "{} {} rejected again after refresh",
                    request.method(),
                    request.path()
                );
                if self.store.clear_in(epoch) {
                    self.events.navigate(Route::Login);
                }
                Err(MarketKitError::SessionExpired)
            }
        }
    }

    /// Rejects `request` locally if the account is blocked and the path is
    /// not allowlisted.
    fn admit(&self, session: &Session, request: &ApiRequest) -> Result<(), MarketKitError> {
        if session.account_active() || self.config.is_allowlisted(request.path()) {
            return Ok(());
        }
        log::debug!("refusing {} {} for a blocked account", request.method(), request.path());
        Err(MarketKitError::AccountBlocked {
            reason: session.block_reason().unwrap_or_default().to_string(),
        })
    }

    /// Blocks the session the request was sent for. A response that outlived
    /// its session changes nothing.
    fn blocked(&self, epoch: u64, reason: String) -> MarketKitError {
        if self.store.set_blocked_in(epoch, reason.clone()) {
            self.events.navigate(Route::Blocked);
        }
        MarketKitError::AccountBlocked { reason }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&AccessToken>,
    ) -> Result<ApiResponse, MarketKitError> {
        let url = format!("{}{}", self.config.api_base_url, request.path());
        let mut builder = self.http.req(request.method().clone(), &url);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, token.bearer());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = self.http.handle(builder).await?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| MarketKitError::NetworkError {
                url,
                status: Some(status),
                error: format!("failed to read response body: {e}"),
            })?;
        Ok(ApiResponse::new(status, body))
    }
}

impl std::fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGateway")
            .field("api_base_url", &self.config.api_base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::{Matcher, Server};

    use super::*;
    use crate::{
        auth::AuthApi,
        events::ClientEvent,
        session::Role,
        storage::MemoryStore,
    };

    struct Harness {
        store: Arc<CredentialStore>,
        events: EventBus,
        refresh: Arc<RefreshCoordinator>,
        gateway: RequestGateway,
    }

    fn harness(server: &Server) -> Harness {
        let config = ClientConfig::with_base_urls(&server.url(), "ws://127.0.0.1:1/ws");
        let store = Arc::new(CredentialStore::hydrate(Arc::new(MemoryStore::new())).unwrap());
        let events = EventBus::new();
        let http = Request::new(Duration::from_secs(5)).unwrap();
        let refresh = Arc::new(RefreshCoordinator::new(
            AuthApi::new(&config.api_base_url, http.clone()),
            store.clone(),
            events.clone(),
            Duration::from_secs(5),
        ));
        let gateway = RequestGateway::new(config, http, store.clone(), refresh.clone(), events.clone());
        Harness {
            store,
            events,
            refresh,
            gateway,
        }
    }

    fn drain(listener: &mut tokio::sync::broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = listener.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_inspect() {
        assert_eq!(inspect(&ApiResponse::new(200, "{}".to_string())), Verdict::Pass);
        assert_eq!(inspect(&ApiResponse::new(401, String::new())), Verdict::Expired);
        assert_eq!(inspect(&ApiResponse::new(404, String::new())), Verdict::Pass);
        assert_eq!(
            inspect(&ApiResponse::new(
                403,
                r#"{"code": "ACCOUNT_BLOCKED", "message": "spam"}"#.to_string()
            )),
            Verdict::Blocked("spam".to_string())
        );
    }

    #[tokio::test]
    async fn test_attaches_bearer() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/jobs")
            .match_header("authorization", "Bearer tok-1")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let h = harness(&server);
        h.store.login("tok-1", Role::User).unwrap();
        let response = h.gateway.send(ApiRequest::get("/jobs")).await.unwrap();

        mock.assert_async().await;
        assert!(response.is_success());
        assert_eq!(response.text(), "[]");
    }

    #[tokio::test]
    async fn test_anonymous_request_has_no_bearer() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/status")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .create_async()
            .await;

        let h = harness(&server);
        h.gateway.send(ApiRequest::get("/status")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_blocked_account_short_circuits() {
        let mut server = Server::new_async().await;
        let mock = server.mock("GET", "/jobs").expect(0).create_async().await;

        let h = harness(&server);
        h.store.login("tok-1", Role::User).unwrap();
        h.store.set_blocked("under review");

        let err = h.gateway.send(ApiRequest::get("/jobs")).await.unwrap_err();
        mock.assert_async().await;
        assert!(matches!(err, MarketKitError::AccountBlocked { reason } if reason == "under review"));
    }

    #[tokio::test]
    async fn test_allowlisted_path_passes_while_blocked() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logout")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let h = harness(&server);
        h.store.login("tok-1", Role::User).unwrap();
        h.store.set_blocked("under review");

        let response = h.gateway.send(ApiRequest::post("/logout")).await.unwrap();
        mock.assert_async().await;
        assert_eq!(response.status(), 204);
    }

    #[tokio::test]
    async fn test_blocked_response_blocks_session_and_navigates_once() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/jobs/\d+$".to_string()))
            .with_status(403)
            .with_body(r#"{"code": "ACCOUNT_BLOCKED", "message": "fraud"}"#)
            .expect_at_most(3)
            .create_async()
            .await;

        let h = harness(&server);
        let mut listener = h.events.subscribe();
        h.store.login("tok-1", Role::User).unwrap();

        let results = futures_util::future::join_all(
            (0..3).map(|i| h.gateway.send(ApiRequest::get(format!("/jobs/{i}")))),
        )
        .await;
        for result in results {
            assert!(matches!(result, Err(MarketKitError::AccountBlocked { .. })));
        }

        assert!(!h.store.read().account_active());
        let navigations: Vec<_> = drain(&mut listener)
            .into_iter()
            .filter(|event| matches!(event, ClientEvent::Navigate(_)))
            .collect();
        assert_eq!(navigations, vec![ClientEvent::Navigate(Route::Blocked)]);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_retried() {
        let mut server = Server::new_async().await;
        let expired = server
            .mock("GET", "/jobs")
            .match_header("authorization", "Bearer tok-1")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/user/refresh")
            .with_status(200)
            .with_body(r#"{"accessToken": "tok-2", "active": true}"#)
            .expect(1)
            .create_async()
            .await;
        let retried = server
            .mock("GET", "/jobs")
            .match_header("authorization", "Bearer tok-2")
            .with_status(200)
            .with_body("[1]")
            .expect(1)
            .create_async()
            .await;

        let h = harness(&server);
        h.store.login("tok-1", Role::User).unwrap();
        let response = h.gateway.send(ApiRequest::get("/jobs")).await.unwrap();

        expired.assert_async().await;
        refresh.assert_async().await;
        retried.assert_async().await;
        assert_eq!(response.text(), "[1]");
    }

    #[tokio::test]
    async fn test_second_expiry_is_final() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/jobs")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/user/refresh")
            .with_status(200)
            .with_body(r#"{"accessToken": "tok-2", "active": true}"#)
            .expect(1)
            .create_async()
            .await;

        let h = harness(&server);
        let mut listener = h.events.subscribe();
        h.store.login("tok-1", Role::User).unwrap();

        let err = h.gateway.send(ApiRequest::get("/jobs")).await.unwrap_err();
        refresh.assert_async().await;
        assert!(matches!(err, MarketKitError::SessionExpired));
        assert_eq!(h.refresh.calls(), 1);
        assert!(!h.store.read().is_authenticated());
        assert!(drain(&mut listener).contains(&ClientEvent::Navigate(Route::Login)));
    }

    #[tokio::test]
    async fn test_block_during_refresh_stops_the_retry() {
        let mut server = Server::new_async().await;
        let h = harness(&server);
        h.store.login("tok-1", Role::User).unwrap();

        let store = Arc::clone(&h.store);
        server
            .mock("GET", "/jobs")
            .match_header("authorization", "Bearer tok-1")
            .with_status(401)
            .with_body_from_request(move |_| {
                store.set_blocked("fraud");
                Vec::new()
            })
            .create_async()
            .await;
        server
            .mock("POST", "/user/refresh")
            .with_status(200)
            .with_body(r#"{"accessToken": "tok-2", "active": true}"#)
            .create_async()
            .await;
        let retried = server
            .mock("GET", "/jobs")
            .match_header("authorization", "Bearer tok-2")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let err = h.gateway.send(ApiRequest::get("/jobs")).await.unwrap_err();

        retried.assert_async().await;
        assert!(matches!(err, MarketKitError::AccountBlocked { reason } if reason == "fraud"));
        assert!(!h.store.read().account_active());
    }

    #[tokio::test]
    async fn test_blocked_response_for_a_replaced_session_is_ignored() {
        let mut server = Server::new_async().await;
        let h = harness(&server);
        let mut listener = h.events.subscribe();
        h.store.login("tok-1", Role::User).unwrap();

        let store = Arc::clone(&h.store);
        server
            .mock("GET", "/jobs")
            .with_status(403)
            .with_body_from_request(move |_| {
                store.login("tok-2", Role::User).unwrap();
                br#"{"code": "ACCOUNT_BLOCKED", "message": "fraud"}"#.to_vec()
            })
            .create_async()
            .await;

        let err = h.gateway.send(ApiRequest::get("/jobs")).await.unwrap_err();

        assert!(matches!(err, MarketKitError::AccountBlocked { .. }));
        let session = h.store.read();
        assert!(session.account_active());
        assert_eq!(session.access_token().map(AccessToken::as_str), Some("tok-2"));
        assert!(!drain(&mut listener).contains(&ClientEvent::Navigate(Route::Blocked)));
    }

    #[tokio::test]
    async fn test_other_statuses_pass_through() {
        let mut server = Server::new_async().await;
        server
            .mock("PATCH", "/jobs/7")
            .match_body(Matcher::Json(serde_json::json!({"status": "done"})))
            .with_status(422)
            .with_body(r#"{"message": "invalid transition"}"#)
            .create_async()
            .await;

        let h = harness(&server);
        h.store.login("tok-1", Role::User).unwrap();
        let request = ApiRequest::patch("/jobs/7")
            .json(&serde_json::json!({"status": "done"}))
            .unwrap();
        let response = h.gateway.send(request).await.unwrap();

        assert_eq!(response.status(), 422);
        assert_eq!(h.refresh.calls(), 0);
        assert!(h.store.read().account_active());
    }

    #[tokio::test]
    async fn test_anonymous_401_is_not_refreshed() {
        let mut server = Server::new_async().await;
        server.mock("GET", "/me").with_status(401).create_async().await;

        let h = harness(&server);
        let response = h.gateway.send(ApiRequest::get("/me")).await.unwrap();
        assert_eq!(response.status(), 401);
        assert_eq!(h.refresh.calls(), 0);
    }
}
