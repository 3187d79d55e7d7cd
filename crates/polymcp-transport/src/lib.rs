//! Transport layer for the polymcp client runtime.
//!
//! A [`Transport`] turns one remote endpoint into a message channel with a
//! uniform lifecycle: `connect`, `send`, `receive`, `disconnect`, plus an
//! observable [`TransportState`]. Three implementations cover the three
//! endpoint kinds the runtime supports:
//!
//! - [`ProcessTransport`] - a locally spawned child process speaking
//!   newline-delimited JSON over its piped stdin/stdout
//! - [`WebSocketTransport`] - a persistent socket carrying one JSON message
//!   per text frame
//! - [`StreamableHttpTransport`] - HTTP POST requests paired with a standing
//!   server-sent-events stream
//!
//! Each transport reconciles its own failure surface (process exit races,
//! socket error/close races, stream timeouts) behind this one contract;
//! connection attempts resolve exactly once no matter which competing event
//! settles them.

pub mod error;
pub mod message;
pub mod process;
pub mod streamable_http;
pub mod traits;
pub mod websocket;

pub use error::{TransportError, TransportResult};
pub use message::TransportMessage;
pub use process::ProcessTransport;
pub use streamable_http::{StreamableHttpConfig, StreamableHttpTransport};
pub use traits::{Transport, TransportState, TransportType};
pub use websocket::{WebSocketConfig, WebSocketTransport};
