//! The core transport trait and its state model.

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::message::TransportMessage;

/// The kind of channel a transport speaks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Locally spawned child process, NDJSON over piped stdio
    Process,
    /// Persistent WebSocket connection
    WebSocket,
    /// HTTP POST requests plus a standing SSE stream
    StreamableHttp,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::WebSocket => write!(f, "websocket"),
            Self::StreamableHttp => write!(f, "streamable-http"),
        }
    }
}

/// Observable lifecycle state of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    /// No channel established
    Disconnected,
    /// A connection attempt is in progress
    Connecting,
    /// Channel established and usable
    Connected,
    /// Teardown in progress
    Disconnecting,
    /// Channel failed; the reason records the first observed failure
    Failed {
        /// What broke the channel
        reason: String,
    },
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// The contract every transport implementation satisfies.
///
/// `connect` settles exactly once per attempt, whichever of the competing
/// establishment events (ready, error, premature close/exit, timeout) fires
/// first. `disconnect` always converges to `Disconnected` and is a safe
/// no-op after a failed or absent connect. `send`/`receive` fail when the
/// channel is not in the `Connected` state.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Returns the kind of this transport.
    fn transport_type(&self) -> TransportType;

    /// Returns the current lifecycle state.
    async fn state(&self) -> TransportState;

    /// Establishes the channel to the remote endpoint.
    async fn connect(&self) -> TransportResult<()>;

    /// Releases the channel. Never fails to converge; errors during
    /// teardown are logged by implementations.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Sends a single message over the channel.
    async fn send(&self, message: TransportMessage) -> TransportResult<()>;

    /// Receives the next inbound message. `Ok(None)` is never returned by
    /// the implementations here; a closed channel surfaces as an error.
    async fn receive(&self) -> TransportResult<Option<TransportMessage>>;

    /// Endpoint identifier for diagnostics (command line, URL).
    fn endpoint(&self) -> String;

    /// Returns `true` if the transport is currently `Connected`.
    async fn is_connected(&self) -> bool {
        matches!(self.state().await, TransportState::Connected)
    }
}
