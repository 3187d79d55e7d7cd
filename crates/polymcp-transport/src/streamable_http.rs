//! Streamable HTTP transport: POST requests plus a standing SSE stream.
//!
//! Two independent timeouts guard this transport: a connection-establishment
//! timeout around the initial stream handshake (and each POST), and a
//! read-idle timeout between SSE chunks. Either expiring fails the pending
//! operation and leaves the transport failed; the caller decides whether to
//! reconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tracing::{debug, error, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::traits::{Transport, TransportState, TransportType};

/// Default connection-establishment timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default read-idle timeout between SSE chunks.
const DEFAULT_SSE_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for a streamable-HTTP-backed endpoint.
#[derive(Debug, Clone)]
pub struct StreamableHttpConfig {
    /// Endpoint URL (the single MCP endpoint for GET and POST)
    pub url: String,
    /// Connection-establishment timeout (also bounds each POST round trip)
    pub connect_timeout: Duration,
    /// Read-idle timeout between chunks of the SSE stream
    pub sse_read_timeout: Duration,
    /// Additional request headers
    pub headers: HashMap<String, String>,
}

impl StreamableHttpConfig {
    /// Configuration with just a URL and default timeouts.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            sse_read_timeout: DEFAULT_SSE_READ_TIMEOUT,
            headers: HashMap::new(),
        }
    }
}

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    /// Event name (`message` when the stream omits it)
    pub event: String,
    /// Joined data payload
    pub data: String,
}

/// Incremental SSE parser: feed raw chunks, get complete events back.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete (blank-line-terminated)
    /// event it completes.
    pub(crate) fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        // Normalize CRLF so the delimiter scan only deals with \n\n
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let raw = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);

            let mut event_name = "message".to_string();
            let mut data_lines: Vec<&str> = Vec::new();
            for line in raw.lines() {
                if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
                } else if let Some(rest) = line.strip_prefix("event:") {
                    event_name = rest.trim().to_string();
                }
                // id: and comment lines are irrelevant here
            }

            if !data_lines.is_empty() {
                events.push(SseEvent {
                    event: event_name,
                    data: data_lines.join("\n"),
                });
            }
        }
        events
    }
}

/// Transport over HTTP POST plus a standing SSE stream.
pub struct StreamableHttpTransport {
    config: StreamableHttpConfig,
    http_client: reqwest::Client,

    /// Lifecycle state (std mutex - short-lived locks, never crosses await)
    state: Arc<StdMutex<TransportState>>,

    /// Session id issued by the server, replayed on every request
    session_id: Arc<StdMutex<Option<String>>>,

    /// Producer half of the inbound channel (shared with the SSE task)
    incoming_tx: Arc<StdMutex<Option<mpsc::Sender<TransportMessage>>>>,

    /// Consumer half of the inbound channel
    receive_channel: Arc<TokioMutex<Option<mpsc::Receiver<TransportMessage>>>>,

    /// Standing SSE stream task handle
    sse_task: Arc<TokioMutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("url", &self.config.url)
            .field("state", &self.state)
            .finish()
    }
}

impl StreamableHttpTransport {
    /// Create a transport for the given configuration. No connection is
    /// made until `connect`.
    ///
    /// The HTTP client carries no global timeout: the standing SSE stream
    /// must outlive any single request, so the establishment and read
    /// timeouts are applied per operation instead.
    pub fn new(config: StreamableHttpConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .build()
            .expect("reqwest client construction cannot fail with default TLS");

        Self {
            config,
            http_client,
            state: Arc::new(StdMutex::new(TransportState::Disconnected)),
            session_id: Arc::new(StdMutex::new(None)),
            incoming_tx: Arc::new(StdMutex::new(None)),
            receive_channel: Arc::new(TokioMutex::new(None)),
            sse_task: Arc::new(TokioMutex::new(None)),
        }
    }

    fn set_state(&self, new_state: TransportState) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if *state != new_state {
            trace!("streamable http transport state: {} -> {}", *state, new_state);
            *state = new_state;
        }
    }

    /// Flip a live transport to `Failed`; later events are logged only.
    fn mark_failed(state: &Arc<StdMutex<TransportState>>, reason: String) {
        let mut state = state.lock().expect("state mutex poisoned");
        if matches!(*state, TransportState::Connected) {
            warn!("streamable http transport failed: {reason}");
            *state = TransportState::Failed { reason };
        } else {
            debug!("late streamable http event ignored ({}): {reason}", *state);
        }
    }

    fn build_headers(&self, accept: &str) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();

        if let Ok(value) = header::HeaderValue::from_str(accept) {
            headers.insert(header::ACCEPT, value);
        }

        if let Some(session_id) = self.session_id.lock().expect("session mutex poisoned").as_ref()
            && let Ok(value) = header::HeaderValue::from_str(session_id)
        {
            headers.insert("Mcp-Session-Id", value);
        }

        for (key, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (
                header::HeaderName::from_bytes(key.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            } else {
                warn!("skipping invalid http header: {key}");
            }
        }

        headers
    }

    fn capture_session_id(&self, response: &reqwest::Response) {
        if let Some(session_id) = response
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|v| v.to_str().ok())
        {
            debug!("captured session id: {session_id}");
            *self.session_id.lock().expect("session mutex poisoned") = Some(session_id.to_string());
        }
    }

    fn incoming_sender(&self) -> Option<mpsc::Sender<TransportMessage>> {
        self.incoming_tx
            .lock()
            .expect("incoming mutex poisoned")
            .clone()
    }

    async fn open_channel(&self) -> TransportResult<()> {
        let url = url::Url::parse(&self.config.url).map_err(|e| {
            TransportError::ConfigurationError(format!(
                "invalid endpoint url {}: {e}",
                self.config.url
            ))
        })?;

        let headers = self.build_headers("text/event-stream");
        let request = self.http_client.get(url).headers(headers);

        let response =
            match tokio::time::timeout(self.config.connect_timeout, request.send()).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    return Err(TransportError::ConnectionFailed(format!(
                        "stream handshake with {} failed: {e}",
                        self.config.url
                    )));
                }
                Err(_) => {
                    return Err(TransportError::ConnectionTimeout {
                        operation: "connect".to_string(),
                        timeout: self.config.connect_timeout,
                    });
                }
            };

        if !response.status().is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "stream handshake with {} failed: HTTP {}",
                self.config.url,
                response.status()
            )));
        }

        self.capture_session_id(&response);

        let (tx, rx) = mpsc::channel(1024);
        *self.incoming_tx.lock().expect("incoming mutex poisoned") = Some(tx.clone());
        *self.receive_channel.lock().await = Some(rx);

        let state = Arc::clone(&self.state);
        let read_timeout = self.config.sse_read_timeout;
        let sse_task = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = SseBuffer::new();

            loop {
                match tokio::time::timeout(read_timeout, stream.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        for event in buffer.push(&String::from_utf8_lossy(&chunk)) {
                            if event.event != "message" {
                                trace!("ignoring sse event type: {}", event.event);
                                continue;
                            }
                            match TransportMessage::from_json_text(&event.data) {
                                Ok(message) => {
                                    if tx.send(message).await.is_err() {
                                        debug!("receive channel closed, stopping sse task");
                                        return;
                                    }
                                }
                                Err(e) => error!("failed to parse sse payload: {e}"),
                            }
                        }
                    }
                    Ok(Some(Err(e))) => {
                        Self::mark_failed(&state, format!("sse stream error: {e}"));
                        break;
                    }
                    Ok(None) => {
                        Self::mark_failed(&state, "sse stream ended".to_string());
                        break;
                    }
                    Err(_) => {
                        let reason = TransportError::ReadTimeout {
                            operation: "sse read".to_string(),
                            timeout: read_timeout,
                        };
                        Self::mark_failed(&state, reason.to_string());
                        break;
                    }
                }
            }
            debug!("streamable http sse task completed");
        });
        *self.sse_task.lock().await = Some(sse_task);

        Ok(())
    }

    /// Deliver the body of a POST response: direct JSON, an SSE body, or
    /// nothing (202 Accepted).
    async fn route_post_response(&self, response: reqwest::Response) -> TransportResult<()> {
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if response.status() == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        let Some(tx) = self.incoming_sender() else {
            return Err(TransportError::SendFailed(
                "transport channel closed".to_string(),
            ));
        };

        if content_type.starts_with("application/json") {
            let body = match tokio::time::timeout(self.config.connect_timeout, response.text())
                .await
            {
                Ok(Ok(body)) => body,
                Ok(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                Err(_) => {
                    return Err(TransportError::ReadTimeout {
                        operation: "post response".to_string(),
                        timeout: self.config.connect_timeout,
                    });
                }
            };
            if body.trim().is_empty() {
                return Ok(());
            }
            let message = TransportMessage::from_json_text(&body)?;
            tx.send(message)
                .await
                .map_err(|_| TransportError::SendFailed("transport channel closed".to_string()))?;
            return Ok(());
        }

        if content_type.starts_with("text/event-stream") {
            let mut stream = response.bytes_stream();
            let mut buffer = SseBuffer::new();
            loop {
                match tokio::time::timeout(self.config.sse_read_timeout, stream.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        for event in buffer.push(&String::from_utf8_lossy(&chunk)) {
                            if event.event != "message" {
                                continue;
                            }
                            let message = TransportMessage::from_json_text(&event.data)?;
                            tx.send(message).await.map_err(|_| {
                                TransportError::SendFailed("transport channel closed".to_string())
                            })?;
                        }
                    }
                    Ok(Some(Err(e))) => {
                        return Err(TransportError::ReceiveFailed(e.to_string()));
                    }
                    Ok(None) => return Ok(()),
                    Err(_) => {
                        return Err(TransportError::ReadTimeout {
                            operation: "post response stream".to_string(),
                            timeout: self.config.sse_read_timeout,
                        });
                    }
                }
            }
        }

        debug!("ignoring post response with content-type {content_type}");
        Ok(())
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
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
                debug!("streamable http transport connected: {}", self.config.url);
                Ok(())
            }
            Err(e) => {
                self.set_state(TransportState::Failed {
                    reason: e.to_string(),
                });
                error!("failed to connect streamable http transport: {e}");
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Disconnected) {
            return Ok(());
        }

        self.set_state(TransportState::Disconnecting);

        if let Some(task) = self.sse_task.lock().await.take() {
            task.abort();
        }
        *self.incoming_tx.lock().expect("incoming mutex poisoned") = None;
        *self.receive_channel.lock().await = None;
        *self.session_id.lock().expect("session mutex poisoned") = None;

        self.set_state(TransportState::Disconnected);
        debug!("streamable http transport disconnected");
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let state = self.state().await;
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::ConnectionFailed(format!(
                "Transport not connected: {state}"
            )));
        }

        let body = message.to_json_text()?;

        let mut headers = self.build_headers("application/json, text/event-stream");
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let request = self
            .http_client
            .post(&self.config.url)
            .headers(headers)
            .body(body);

        let response =
            match tokio::time::timeout(self.config.connect_timeout, request.send()).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    Self::mark_failed(&self.state, format!("post failed: {e}"));
                    return Err(TransportError::SendFailed(e.to_string()));
                }
                Err(_) => {
                    return Err(TransportError::ConnectionTimeout {
                        operation: "post".to_string(),
                        timeout: self.config.connect_timeout,
                    });
                }
            };

        self.capture_session_id(&response);

        if !response.status().is_success() {
            return Err(TransportError::SendFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        self.route_post_response(response).await
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
