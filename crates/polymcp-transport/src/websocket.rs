//! WebSocket transport: one JSON-RPC message per text frame.
//!
//! Establishment resolves exactly once on the first of {open, error,
//! close-before-open} (the handshake future settles on whichever comes
//! first). A close or error observed after the channel opened flips the
//! transport to `Failed`; it never re-resolves the original attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::traits::{Transport, TransportState, TransportType};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Configuration for a WebSocket-backed endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// WebSocket URL (`ws://` or `wss://`)
    pub url: String,
    /// Optional bearer token sent as an `Authorization` header
    pub auth_token: Option<String>,
    /// Additional request headers for the handshake
    pub headers: HashMap<String, String>,
}

impl WebSocketConfig {
    /// Configuration with just a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            headers: HashMap::new(),
        }
    }
}

/// Transport over a persistent WebSocket connection.
pub struct WebSocketTransport {
    config: WebSocketConfig,

    /// Lifecycle state (std mutex - short-lived locks, never crosses await)
    state: Arc<StdMutex<TransportState>>,

    /// Write half of the socket (crosses await points)
    writer: Arc<TokioMutex<Option<WsSink>>>,

    /// Inbound message channel fed by the reader task
    receive_channel: Arc<TokioMutex<Option<mpsc::Receiver<TransportMessage>>>>,

    /// Background reader task handle
    reader_task: Arc<TokioMutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.config.url)
            .field("state", &self.state)
            .finish()
    }
}

impl WebSocketTransport {
    /// Create a transport for the given configuration. No connection is
    /// made until `connect`.
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            state: Arc::new(StdMutex::new(TransportState::Disconnected)),
            writer: Arc::new(TokioMutex::new(None)),
            receive_channel: Arc::new(TokioMutex::new(None)),
            reader_task: Arc::new(TokioMutex::new(None)),
        }
    }

    fn set_state(&self, new_state: TransportState) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if *state != new_state {
            trace!("websocket transport state: {} -> {}", *state, new_state);
            *state = new_state;
        }
    }

    /// Flip a live transport to `Failed`; later events are logged only.
    fn mark_failed(state: &Arc<StdMutex<TransportState>>, reason: String) {
        let mut state = state.lock().expect("state mutex poisoned");
        if matches!(*state, TransportState::Connected) {
            warn!("websocket transport failed: {reason}");
            *state = TransportState::Failed { reason };
        } else {
            debug!("late websocket event ignored ({}): {reason}", *state);
        }
    }

    fn build_request(
        &self,
    ) -> TransportResult<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let mut request = self.config.url.as_str().into_client_request().map_err(|e| {
            TransportError::ConfigurationError(format!(
                "invalid websocket url {}: {e}",
                self.config.url
            ))
        })?;

        let headers = request.headers_mut();

        if let Some(token) = &self.config.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                TransportError::ConfigurationError(format!("invalid auth token: {e}"))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        for (key, value) in &self.config.headers {
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("skipping invalid websocket header: {key}"),
            }
        }

        Ok(request)
    }

    async fn open_channel(&self) -> TransportResult<()> {
        let request = self.build_request()?;

        // connect_async settles once, on the first of open, error, or a
        // close that beats the handshake
        let (ws_stream, _response) = connect_async(request).await.map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "websocket handshake with {} failed: {e}",
                self.config.url
            ))
        })?;

        let (sink, mut stream) = ws_stream.split();
        *self.writer.lock().await = Some(sink);

        let (tx, rx) = mpsc::channel(1024);
        *self.receive_channel.lock().await = Some(rx);

        let state = Arc::clone(&self.state);
        let reader_task = tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        match TransportMessage::from_json_text(text.as_str()) {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    debug!("receive channel closed, stopping reader task");
                                    break;
                                }
                            }
                            Err(e) => error!("failed to parse websocket frame: {e}"),
                        }
                    }
                    Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                        Ok(text) => match TransportMessage::from_json_text(text) {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => error!("failed to parse websocket frame: {e}"),
                        },
                        Err(_) => warn!("dropping non-UTF-8 binary websocket frame"),
                    },
                    // Pings are answered by the protocol layer on the next write
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| format!("closed by peer: {}", f.reason))
                            .unwrap_or_else(|| "closed by peer".to_string());
                        Self::mark_failed(&state, reason);
                        break;
                    }
                    Err(e) => {
                        Self::mark_failed(&state, format!("socket error: {e}"));
                        break;
                    }
                }
            }
            debug!("websocket reader task completed");
        });
        *self.reader_task.lock().await = Some(reader_task);

        Ok(())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }

    async fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Connected) {
            return Ok(());
        }

        self.set_state(TransportState::Connecting);

        match self.open_channel().await {
            Ok(()) => {
                self.set_state(TransportState::Connected);
                debug!("websocket transport connected: {}", self.config.url);
                Ok(())
            }
            Err(e) => {
                self.set_state(TransportState::Failed {
                    reason: e.to_string(),
                });
                error!("failed to connect websocket transport: {e}");
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Disconnected) {
            return Ok(());
        }

        self.set_state(TransportState::Disconnecting);

        if let Some(mut sink) = self.writer.lock().await.take() {
            if let Err(e) = sink.send(Message::Close(None)).await {
                debug!("close frame not delivered: {e}");
            }
        }

        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        *self.receive_channel.lock().await = None;

        self.set_state(TransportState::Disconnected);
        debug!("websocket transport disconnected");
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let state = self.state().await;
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::ConnectionFailed(format!(
                "Transport not connected: {state}"
            )));
        }

        let text = message.to_json_text()?;
        let size = text.len();

        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(TransportError::SendFailed(
                "socket writer not available".to_string(),
            ));
        };

        if let Err(e) = writer.send(Message::Text(text.into())).await {
            Self::mark_failed(&self.state, format!("socket write error: {e}"));
            return Err(TransportError::SendFailed(e.to_string()));
        }

        trace!("websocket transport sent {size} bytes");
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let state = self.state().await;
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::ConnectionFailed(format!(
                "Transport not connected: {state}"
            )));
        }

        let mut receive_channel = self.receive_channel.lock().await;
        let Some(receiver) = receive_channel.as_mut() else {
            return Err(TransportError::ReceiveFailed(
                "receive channel not available".to_string(),
            ));
        };

        match receiver.recv().await {
            Some(message) => Ok(Some(message)),
            None => {
                Self::mark_failed(&self.state, "receive channel disconnected".to_string());
                Err(TransportError::ReceiveFailed(
                    "channel disconnected".to_string(),
                ))
            }
        }
    }

    fn endpoint(&self) -> String {
        self.config.url.clone()
    }
}
