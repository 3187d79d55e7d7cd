//! Client error taxonomy.
//!
//! `ClientError` is `Clone`: a single failed connect attempt is observed by
//! every caller that joined it, so the error value must be shareable.

use polymcp_transport::TransportError;
use thiserror::Error;

/// A specialized `Result` type for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the client runtime.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ClientError {
    /// Unknown server name or unresolvable connector shape.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport establishment failure: spawn error, socket error,
    /// premature close, handshake failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An operation was attempted on an unconnected resource.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Tools were requested before the handshake completed.
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// A remote tool invocation failed at the protocol level.
    #[error("Tool '{name}' failed: {message}")]
    ToolExecution {
        /// Name of the tool that failed
        name: String,
        /// Failure detail
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed or unexpected protocol traffic.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("serialization failed: {err}"))
    }
}
