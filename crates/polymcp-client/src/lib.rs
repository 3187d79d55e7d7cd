//! Multi-server MCP client runtime.
//!
//! This crate is the connection and session lifecycle core: it
//! establishes, deduplicates, tears down, and multiplexes heterogeneous
//! transport connections to named MCP servers, and caches each endpoint's
//! discovered tool set.
//!
//! Layers, leaves first:
//!
//! - [`ConnectionManager`] - generic single-flight lifecycle around a
//!   connect/close pair
//! - [`Connector`] - transport-specific connect/disconnect plus protocol
//!   operations, in process/socket/stream variants
//! - [`Session`] - one connector bound to its capability cache, with
//!   auto-connect convenience
//! - [`Client`] - name→config and name→session registries
//! - [`ServerManager`] - active-server selection and per-server tool cache
//!   over a shared client
//!
//! # Examples
//!
//! ```rust,no_run
//! use polymcp_client::{Client, ServerConfig, ServerManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> polymcp_client::ClientResult<()> {
//! let client = Arc::new(Client::new());
//! client.add_server(
//!     "files",
//!     ServerConfig::from_value(serde_json::json!({
//!         "command": "mcp-files", "args": ["--root", "/tmp"]
//!     }))?,
//! );
//!
//! let manager = ServerManager::new(Arc::clone(&client));
//! println!("{}", manager.connect_to_server("files").await);
//! println!("{}", manager.list_servers().await);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod manager;
pub mod session;

pub use client::Client;
pub use config::{ServerConfig, ServersConfig};
pub use connection::{ConnectionEvent, ConnectionHandler, ConnectionManager, ConnectionState};
pub use connector::{
    Connector, HttpConnector, ProcessConnector, WebSocketConnector, connector_for_config,
};
pub use error::{ClientError, ClientResult};
pub use manager::ServerManager;
pub use session::{Session, SessionState};
