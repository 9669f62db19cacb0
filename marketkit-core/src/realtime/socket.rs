//! The WebSocket transport: connect, pump frames, back off, try again.
//!
//! The loop knows nothing about sessions or the ledger. It asks for the
//! current token before every attempt and reports what happens through
//! `emit`, which returns `false` once the owner no longer wants signals.

use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use backon::{BackoffBuilder, ExponentialBuilder};

use super::frames::{ClientFrame, ServerFrame};
use crate::{config::ReconnectConfig, session::AccessToken};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the transport reports to its owner.
#[derive(Debug)]
pub(crate) enum Signal {
    /// Handshake completed.
    Established,
    /// A decoded server event.
    Frame(ServerFrame),
    /// The connection dropped or an attempt failed; another attempt follows.
    Lost(String),
    /// The server refused the token at handshake. The loop has stopped.
    Rejected(u16),
    /// Reconnect attempts ran out. The loop has stopped.
    Exhausted,
}

#[derive(Debug)]
enum ConnectError {
    Rejected(u16),
    Transport(String),
}

enum Ended {
    /// The owner went away or closed the outbound queue.
    Stopped,
    /// The connection is gone.
    Lost(String),
}

fn backoff(policy: &ReconnectConfig) -> impl Iterator<Item = std::time::Duration> {
    ExponentialBuilder::default()
        .with_min_delay(policy.min_delay())
        .with_max_delay(policy.max_delay())
        .with_max_times(policy.max_attempts)
        .with_jitter()
        .build()
}

/// Runs until stopped, rejected, or out of attempts.
pub(crate) async fn run<T, E>(
    url: String,
    policy: ReconnectConfig,
    token: T,
    emit: E,
    mut outbound: mpsc::UnboundedReceiver<ClientFrame>,
) where
    T: Fn() -> Option<AccessToken>,
    E: Fn(Signal) -> bool,
{
    let mut delays = backoff(&policy);

    loop {
        let Some(token) = token() else {
            log::debug!("realtime: no token, not connecting");
            return;
        };

        match connect(&url, &token).await {
            Ok(stream) => {
                if !emit(Signal::Established) {
                    return;
                }
                delays = backoff(&policy);
                match pump(stream, &emit, &mut outbound).await {
                    Ended::Stopped => return,
                    Ended::Lost(reason) => {
                        if !emit(Signal::Lost(reason)) {
                            return;
                        }
                    }
                }
            }
            Err(ConnectError::Rejected(status)) => {
                log::warn!("realtime: handshake rejected with {status}");
                emit(Signal::Rejected(status));
                return;
            }
            Err(ConnectError::Transport(reason)) => {
                if !emit(Signal::Lost(reason)) {
                    return;
                }
            }
        }

        let Some(delay) = delays.next() else {
            log::warn!("realtime: giving up after {} attempts", policy.max_attempts);
            emit(Signal::Exhausted);
            return;
        };
        log::debug!("realtime: reconnecting in {delay:?}");
        tokio::time::sleep(delay).await;
    }
}

async fn connect(url: &str, token: &AccessToken) -> Result<Stream, ConnectError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ConnectError::Transport(format!("invalid realtime url: {e}")))?;
    let bearer = HeaderValue::from_str(&token.bearer())
        .map_err(|e| ConnectError::Transport(format!("invalid token header: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    match connect_async(request).await {
        Ok((stream, _)) => {
            log::info!("realtime: connected to {url}");
            Ok(stream)
        }
        Err(tungstenite::Error::Http(response))
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            Err(ConnectError::Rejected(response.status().as_u16()))
        }
        Err(e) => Err(ConnectError::Transport(e.to_string())),
    }
}

async fn pump<E>(
    stream: Stream,
    emit: &E,
    outbound: &mut mpsc::UnboundedReceiver<ClientFrame>,
) -> Ended
where
    E: Fn(Signal) -> bool,
{
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    return Ended::Stopped;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("realtime: failed to encode {frame:?}: {e}");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    return Ended::Lost(e.to_string());
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(text.as_str()) {
                        Ok(frame) => {
                            if !emit(Signal::Frame(frame)) {
                                return Ended::Stopped;
                            }
                        }
                        Err(e) => log::debug!("realtime: ignoring frame: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Ended::Lost("closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Ended::Lost(e.to_string()),
            }
        }
    }
}
