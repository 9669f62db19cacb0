//! Thin wrapper over the HTTP client shared by the auth API and the gateway.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};

use crate::error::MarketKitError;

/// A thin wrapper over the HTTP client. Sets sensible defaults such as
/// timeouts and user-agent, and keeps a cookie jar so the durable refresh
/// credential set at login is replayed on refresh.
///
/// Requests are never retried here: the only retry in the system is the
/// gateway's single retry after a token refresh.
#[derive(Debug, Clone)]
pub(crate) struct Request {
    client: reqwest::Client,
    timeout: Duration,
}

impl Request {
    /// Initializes a new `Request` instance.
    pub(crate) fn new(timeout: Duration) -> Result<Self, MarketKitError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(format!("marketkit-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MarketKitError::internal(format!("http client: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// Creates a request builder with defaults applied.
    pub(crate) fn req(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url).timeout(self.timeout)
    }

    /// Creates a POST request builder with defaults applied.
    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.req(Method::POST, url)
    }

    /// Sends a request built by `req`/`post`, turning transport failures into
    /// [`MarketKitError::NetworkError`]. Any HTTP status is returned as-is.
    pub(crate) async fn handle(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, MarketKitError> {
        let (client, request) = request_builder.build_split();
        let request = request.map_err(|err| MarketKitError::NetworkError {
            url: err
                .url()
                .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
            status: None,
            error: format!("request build failed: {err}"),
        })?;
        let url = request.url().to_string();

        client.execute(request).await.map_err(|err| {
            let error = if err.is_timeout() || err.is_connect() {
                format!("request timeout/connect error: {err}")
            } else {
                format!("request failed: {err}")
            };
            MarketKitError::NetworkError {
                url,
                status: None,
                error,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_user_agent_is_set() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/ping")
            .match_header(
                "user-agent",
                format!("marketkit-core/{}", env!("CARGO_PKG_VERSION")).as_str(),
            )
            .with_status(204)
            .create_async()
            .await;

        let request = Request::new(Duration::from_secs(5)).unwrap();
        let response = request
            .handle(request.post(&format!("{}/ping", server.url())))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status().as_u16(), 204);
    }

    #[tokio::test]
    async fn test_cookies_are_replayed() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/user/login")
            .with_status(200)
            .with_header("set-cookie", "refresh=durable-1; Path=/")
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/user/refresh")
            .match_header("cookie", "refresh=durable-1")
            .with_status(200)
            .create_async()
            .await;

        let request = Request::new(Duration::from_secs(5)).unwrap();
        request
            .handle(request.post(&format!("{}/user/login", server.url())))
            .await
            .unwrap();
        request
            .handle(request.post(&format!("{}/user/refresh", server.url())))
            .await
            .unwrap();

        login.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        let request = Request::new(Duration::from_secs(1)).unwrap();
        let err = request
            .handle(request.post("http://127.0.0.1:1/unreachable"))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketKitError::NetworkError { status: None, .. }));
    }
}
