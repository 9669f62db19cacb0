//! Helpers shared across integration tests.
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use marketkit_core::{
    events::ClientEvent, ledger::Notification, storage::MemoryStore, ClientConfig, MarketClient,
    ReconnectConfig,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
};
use tokio_tungstenite::{
    tungstenite::{
        handshake::server::{Request, Response},
        Message,
    },
    WebSocketStream,
};

pub type ServerSocket = WebSocketStream<TcpStream>;

pub fn config(api_url: &str, ws_url: &str) -> ClientConfig {
    let mut config = ClientConfig::with_base_urls(api_url, ws_url);
    config.blocked_redirect_delay_ms = 50;
    config.reconnect = ReconnectConfig {
        min_delay_ms: 10,
        max_delay_ms: 50,
        max_attempts: 5,
    };
    config
}

pub fn client(api_url: &str, ws_url: &str) -> MarketClient {
    MarketClient::new(config(api_url, ws_url), Arc::new(MemoryStore::new())).unwrap()
}

pub fn drain(listener: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    std::iter::from_fn(|| listener.try_recv().ok()).collect()
}

/// Waits for the next event, failing the test after a few seconds.
pub async fn next_event(listener: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .expect("timed out waiting for an event")
        .unwrap()
}

pub fn notification(id: &str, minute: u32) -> Notification {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "title": format!("title {id}"),
        "message": format!("message {id}"),
        "createdAt": format!("2026-03-01T12:{minute:02}:00Z"),
        "isRead": false,
    }))
    .unwrap()
}

/// A local WebSocket endpoint standing in for the realtime backend.
pub struct RealtimeServer {
    listener: TcpListener,
    pub url: String,
}

impl RealtimeServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        Self { listener, url }
    }

    /// Accepts one connection and returns it with its `Authorization` header.
    pub async fn accept(&self) -> (ServerSocket, Option<String>) {
        let (tcp, _) = tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        let mut authorization = None;
        let socket = tokio_tungstenite::accept_hdr_async(tcp, |request: &Request, response: Response| {
            authorization = request
                .headers()
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(ToString::to_string);
            Ok(response)
        })
        .await
        .unwrap();
        (socket, authorization)
    }

    /// Accepts one connection and refuses it at the handshake.
    pub async fn reject(&self, status: u16) {
        let (tcp, _) = self.listener.accept().await.unwrap();
        let _ = tokio_tungstenite::accept_hdr_async(tcp, |_: &Request, _: Response| {
            Err(tokio_tungstenite::tungstenite::http::Response::builder()
                .status(status)
                .body(None)
                .unwrap())
        })
        .await;
    }
}

pub async fn send_event(socket: &mut ServerSocket, event: &str, data: serde_json::Value) {
    let frame = serde_json::json!({ "event": event, "data": data });
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Reads the next text frame as JSON.
pub async fn recv_json(socket: &mut ServerSocket) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a client frame")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}
