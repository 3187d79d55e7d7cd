//! Registry of server configurations and live sessions.
//!
//! The client is the single writer of both registries. Bulk operations are
//! best-effort: a failure for one name is isolated and logged, the rest
//! are still attempted. Teardown never propagates close errors and always
//! removes registry entries, so the active set stays a subset of the
//! session registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock as StdRwLock};

use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::config::ServerConfig;
use crate::connector::connector_for_config;
use crate::error::{ClientError, ClientResult};
use crate::session::Session;

/// Multi-server MCP client: name→config and name→session registries.
#[derive(Default)]
pub struct Client {
    configs: StdRwLock<HashMap<String, ServerConfig>>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    active: StdRwLock<HashSet<String>>,
}

impl Client {
    /// An empty client with no configured servers.
    pub fn new() -> Self {
        Self::default()
    }

    /// A client pre-populated with the given server configurations.
    pub fn with_configs(configs: HashMap<String, ServerConfig>) -> Self {
        let client = Self::new();
        *client.configs.write().expect("config lock poisoned") = configs;
        client
    }

    /// Register (or replace) a server configuration.
    pub fn add_server(&self, name: impl Into<String>, config: ServerConfig) {
        let name = name.into();
        debug!("registering server '{name}' ({})", config.kind());
        self.configs
            .write()
            .expect("config lock poisoned")
            .insert(name, config);
    }

    /// Deregister a server. A live session for the name is closed first
    /// (close errors are logged, not propagated) so no orphaned connection
    /// outlives its configuration.
    pub async fn remove_server(&self, name: &str) {
        let session = self.sessions.write().await.remove(name);
        self.active
            .write()
            .expect("active lock poisoned")
            .remove(name);

        if let Some(session) = session
            && let Err(e) = session.disconnect().await
        {
            warn!("error closing session for removed server '{name}': {e}");
        }

        self.configs
            .write()
            .expect("config lock poisoned")
            .remove(name);
    }

    /// All configured server names, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .configs
            .read()
            .expect("config lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// The configuration registered under `name`.
    pub fn get_server_config(&self, name: &str) -> Option<ServerConfig> {
        self.configs
            .read()
            .expect("config lock poisoned")
            .get(name)
            .cloned()
    }

    /// Create and register a session for a configured server.
    ///
    /// Fails with a configuration error - leaving all registries
    /// untouched - when the name is unknown. With `auto_initialize`, the
    /// handshake is attempted immediately; a handshake failure is logged
    /// and the partially-initialized session is still registered, since a
    /// later manual `initialize` may succeed.
    pub async fn create_session(
        &self,
        name: &str,
        auto_initialize: bool,
    ) -> ClientResult<Arc<Session>> {
        let config = self.get_server_config(name).ok_or_else(|| {
            ClientError::Config(format!("Server '{name}' not found in config"))
        })?;

        let connector = connector_for_config(&config);
        let session = Arc::new(Session::new(connector, true));

        if auto_initialize
            && let Err(e) = session.initialize().await
        {
            warn!("failed to initialize session for '{name}': {e}");
        }

        self.sessions
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&session));
        self.active
            .write()
            .expect("active lock poisoned")
            .insert(name.to_string());
        debug!("session registered for '{name}'");

        Ok(session)
    }

    /// Create sessions for every configured server, best-effort. Failures
    /// are logged and excluded from the result; the rest are attempted.
    pub async fn create_all_sessions(
        &self,
        auto_initialize: bool,
    ) -> HashMap<String, Arc<Session>> {
        let mut sessions = HashMap::new();
        for name in self.server_names() {
            match self.create_session(&name, auto_initialize).await {
                Ok(session) => {
                    sessions.insert(name, session);
                }
                Err(e) => error!("failed to create session for '{name}': {e}"),
            }
        }
        sessions
    }

    /// The session registered under `name`.
    pub async fn get_session(&self, name: &str) -> ClientResult<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::Config(format!("No session exists for server '{name}'")))
    }

    /// The subset of registered sessions currently marked active.
    pub async fn get_all_active_sessions(&self) -> HashMap<String, Arc<Session>> {
        let active = self.active.read().expect("active lock poisoned").clone();
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(name, _)| active.contains(*name))
            .map(|(name, session)| (name.clone(), Arc::clone(session)))
            .collect()
    }

    /// Close and deregister one session. Disconnect errors are logged,
    /// never re-thrown; the registry entries are removed regardless of the
    /// disconnect outcome.
    pub async fn close_session(&self, name: &str) -> ClientResult<()> {
        let session = self.sessions.write().await.remove(name);
        self.active
            .write()
            .expect("active lock poisoned")
            .remove(name);

        match session {
            Some(session) => {
                if let Err(e) = session.disconnect().await {
                    error!("error closing session for '{name}': {e}");
                }
                debug!("session closed for '{name}'");
            }
            None => warn!("no session exists for server '{name}', nothing to close"),
        }
        Ok(())
    }

    /// Close every registered session.
    pub async fn close_all_sessions(&self) {
        let names: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for name in names {
            // close_session only errs on lookup, and these names came from
            // the registry
            let _ = self.close_session(&name).await;
        }
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn register_session_for_tests(&self, name: &str, session: Arc<Session>) {
        self.sessions
            .write()
            .await
            .insert(name.to_string(), session);
        self.active
            .write()
            .expect("active lock poisoned")
            .insert(name.to_string());
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("servers", &self.server_names())
            .finish()
    }
}
