//! Server selection over a [`Client`]'s sessions.
//!
//! The manager designates one server name as the "active" invocation
//! target. Selection is decoupled from the session's life: switching or
//! clearing the active server never tears the underlying session down, so
//! the active target can change repeatedly without reconnect churn. Tool
//! lists are cached per server on first discovery and never evicted.
//!
//! The four management operations return status text - failures are
//! reported inline, not raised - because their consumer is an external
//! orchestration collaborator, not this crate's programmatic API.

use std::collections::HashMap;
use std::sync::Arc;

use polymcp_protocol::Tool;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::ClientResult;

/// Tracks the active server and a per-server tool cache over a shared
/// [`Client`]. The manager references the client's sessions; it never owns
/// them.
pub struct ServerManager {
    client: Arc<Client>,
    active_server: RwLock<Option<String>>,
    tool_cache: RwLock<HashMap<String, Vec<Tool>>>,
}

impl ServerManager {
    /// Manage the servers configured on `client`.
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            active_server: RwLock::new(None),
            tool_cache: RwLock::new(HashMap::new()),
        }
    }

    /// The underlying client.
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Tool list for one server: cache, else an existing session, else a
    /// session created just for discovery.
    async fn tools_for(&self, name: &str) -> ClientResult<Vec<Tool>> {
        if let Some(tools) = self.tool_cache.read().await.get(name) {
            return Ok(tools.clone());
        }

        let session = match self.client.get_session(name).await {
            Ok(session) => session,
            Err(_) => self.client.create_session(name, true).await?,
        };

        let tools = session.discover_tools().await?;
        self.tool_cache
            .write()
            .await
            .insert(name.to_string(), tools.clone());
        Ok(tools)
    }

    /// Summarize every configured server: active marker plus tool names.
    /// Discovery failures for one server are reported inline and do not
    /// abort the listing of the others.
    pub async fn list_servers(&self) -> String {
        let names = self.client.server_names();
        if names.is_empty() {
            return "No MCP servers are configured.".to_string();
        }

        let active = self.active_server.read().await.clone();
        let mut output = String::from("Configured MCP servers:\n");
        for name in names {
            let marker = if active.as_deref() == Some(name.as_str()) {
                " (active)"
            } else {
                ""
            };
            let tools_text = match self.tools_for(&name).await {
                Ok(tools) if tools.is_empty() => "no tools".to_string(),
                Ok(tools) => tools
                    .iter()
                    .map(|t| t.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                Err(e) => {
                    warn!("tool discovery for '{name}' failed: {e}");
                    "tools unavailable".to_string()
                }
            };
            output.push_str(&format!("- {name}{marker}: {tools_text}\n"));
        }
        output
    }

    /// Make `name` the active server, creating its session on demand.
    pub async fn connect_to_server(&self, name: &str) -> String {
        if self.client.get_server_config(name).is_none() {
            let valid = self.client.server_names().join(", ");
            return format!("Server '{name}' not found. Valid servers: {valid}");
        }

        if self.active_server.read().await.as_deref() == Some(name) {
            return format!("Already connected to server '{name}'.");
        }

        let session = match self.client.get_session(name).await {
            Ok(session) => session,
            Err(_) => match self.client.create_session(name, true).await {
                Ok(session) => session,
                Err(e) => return format!("Failed to connect to server '{name}': {e}"),
            },
        };

        *self.active_server.write().await = Some(name.to_string());
        debug!("active server set to '{name}'");

        if self.tool_cache.read().await.contains_key(name) {
            return format!("Connected to server '{name}'.");
        }
        match session.discover_tools().await {
            Ok(tools) => {
                let count = tools.len();
                self.tool_cache
                    .write()
                    .await
                    .insert(name.to_string(), tools);
                format!("Connected to server '{name}'. {count} tools available.")
            }
            Err(e) => {
                warn!("tool discovery for '{name}' failed: {e}");
                format!("Connected to server '{name}', but tool discovery failed: {e}")
            }
        }
    }

    /// Report the active server, if any.
    pub async fn get_active_server(&self) -> String {
        match self.active_server.read().await.as_deref() {
            Some(name) => format!("Active server: {name}"),
            None => "No server is currently active.".to_string(),
        }
    }

    /// Clear the active-server selection. The underlying session stays
    /// registered with the client - this is a selection change, not a
    /// teardown.
    pub async fn disconnect_from_server(&self) -> String {
        match self.active_server.write().await.take() {
            Some(name) => {
                debug!("cleared active server '{name}'");
                format!("Disconnected from server '{name}'. Its session remains available.")
            }
            None => "No server is currently active.".to_string(),
        }
    }

    /// Cached tools for the active server, or an empty set (with a
    /// warning) when nothing is active or cached.
    pub async fn get_active_server_tools(&self) -> Vec<Tool> {
        let Some(name) = self.active_server.read().await.clone() else {
            warn!("no active server; returning no tools");
            return Vec::new();
        };
        match self.tool_cache.read().await.get(&name) {
            Some(tools) => tools.clone(),
            None => {
                warn!("no cached tools for active server '{name}'");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("client", &self.client)
            .finish()
    }
}
