//! Wire types for the Model Context Protocol.
//!
//! This crate is pure data: the JSON-RPC 2.0 envelope used to frame every
//! message, and the MCP request/result types the client runtime exchanges
//! with servers (initialize handshake, tool discovery and invocation,
//! resource listing and reads). No I/O lives here - transports and the
//! client runtime consume these types.

pub mod jsonrpc;
pub mod types;

pub use jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, MessageId};
pub use types::*;

/// MCP protocol revision negotiated during the initialize handshake.
pub const PROTOCOL_VERSION: &str = "2025-03-26";
