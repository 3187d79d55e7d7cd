//! One connector paired with its discovered capability cache.
//!
//! Session states move forward only - `Unconnected` to
//! `ConnectedUninitialized` to `ConnectedInitialized` - except
//! `disconnect`, which returns to `Unconnected` from any state. With
//! auto-connect enabled (the default), `initialize` and `call_tool`
//! connect on demand instead of failing fast.

use std::sync::RwLock as StdRwLock;

use polymcp_protocol::{CallToolResult, Implementation, InitializeResult, Tool};
use tracing::debug;

use crate::connector::Connector;
use crate::error::{ClientError, ClientResult};

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport channel
    Unconnected,
    /// Channel up, handshake not yet performed
    ConnectedUninitialized,
    /// Channel up and handshake complete
    ConnectedInitialized,
}

/// A live binding of one connector to its capability cache.
pub struct Session {
    connector: Box<dyn Connector>,
    auto_connect: bool,
    init_result: StdRwLock<Option<InitializeResult>>,
}

impl Session {
    /// Wrap a connector. `auto_connect` makes `initialize` and `call_tool`
    /// establish the channel on demand.
    pub fn new(connector: Box<dyn Connector>, auto_connect: bool) -> Self {
        Self {
            connector,
            auto_connect,
            init_result: StdRwLock::new(None),
        }
    }

    /// The connector this session owns.
    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    /// Whether the transport channel is currently up.
    pub async fn is_connected(&self) -> bool {
        self.connector.is_connected().await
    }

    /// Whether the handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.init_result
            .read()
            .expect("init lock poisoned")
            .is_some()
    }

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        if !self.is_connected().await {
            SessionState::Unconnected
        } else if self.is_initialized() {
            SessionState::ConnectedInitialized
        } else {
            SessionState::ConnectedUninitialized
        }
    }

    /// What the server reported about itself, if initialized.
    pub fn server_info(&self) -> Option<Implementation> {
        self.init_result
            .read()
            .expect("init lock poisoned")
            .as_ref()
            .map(|r| r.server_info.clone())
    }

    /// Establish the transport channel.
    pub async fn connect(&self) -> ClientResult<()> {
        self.connector.connect().await
    }

    /// Tear down the channel and forget the handshake, from any state.
    pub async fn disconnect(&self) -> ClientResult<()> {
        *self.init_result.write().expect("init lock poisoned") = None;
        self.connector.disconnect().await
    }

    /// Perform the handshake, connecting first when auto-connect allows.
    /// A repeated call re-fetches the capability cache.
    pub async fn initialize(&self) -> ClientResult<InitializeResult> {
        if !self.is_connected().await {
            if self.auto_connect {
                self.connector.connect().await?;
            } else {
                return Err(ClientError::NotConnected(
                    "session is not connected and auto-connect is disabled".to_string(),
                ));
            }
        }

        let result = self.connector.initialize().await?;
        debug!(
            "session initialized against {} ({})",
            result.server_info.name, result.protocol_version
        );
        *self.init_result.write().expect("init lock poisoned") = Some(result.clone());
        Ok(result)
    }

    /// The tools this endpoint exposes.
    ///
    /// Initialized sessions answer from the connector's cache. A connected
    /// but uninitialized session performs the handshake to fetch them. An
    /// unconnected session reports an empty set without error - not every
    /// caller needs tools eagerly.
    pub async fn discover_tools(&self) -> ClientResult<Vec<Tool>> {
        if self.is_initialized() {
            return self.connector.tools().await;
        }
        if self.is_connected().await {
            self.initialize().await?;
            return self.connector.tools().await;
        }
        Ok(Vec::new())
    }

    /// Invoke a named tool, connecting and initializing on demand when
    /// auto-connect allows.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> ClientResult<CallToolResult> {
        if !self.is_connected().await {
            if !self.auto_connect {
                return Err(ClientError::NotConnected(format!(
                    "cannot call tool '{name}': session is not connected"
                )));
            }
            self.initialize().await?;
        } else if !self.is_initialized() {
            self.initialize().await?;
        }

        self.connector.call_tool(name, arguments).await
    }

    /// Protocol-level health check.
    pub async fn ping(&self) -> ClientResult<()> {
        self.connector.ping().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.connector.endpoint())
            .field("auto_connect", &self.auto_connect)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::testing::{MockConnector, tool};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn initialize_auto_connects() {
        let session = Session::new(Box::new(MockConnector::with_tools(&["echo"])), true);
        assert_eq!(session.state().await, SessionState::Unconnected);

        let result = session.initialize().await.unwrap();
        assert_eq!(result.server_info.name, "mock-server");
        assert_eq!(session.state().await, SessionState::ConnectedInitialized);
        assert_eq!(session.server_info().unwrap().name, "mock-server");
    }

    #[tokio::test]
    async fn initialize_without_auto_connect_fails_fast() {
        let session = Session::new(Box::new(MockConnector::default()), false);
        let result = session.initialize().await;
        assert!(matches!(result, Err(ClientError::NotConnected(_))));
        assert_eq!(session.state().await, SessionState::Unconnected);
    }

    #[tokio::test]
    async fn discover_tools_on_unconnected_session_is_empty_not_an_error() {
        let session = Session::new(Box::new(MockConnector::with_tools(&["echo"])), false);
        let tools = session.discover_tools().await.unwrap();
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn discover_tools_fetches_when_connected_but_uninitialized() {
        let mock = MockConnector::connected_with_tools(&["echo", "grep"]);
        let session = Session::new(Box::new(mock), false);
        assert_eq!(session.state().await, SessionState::ConnectedUninitialized);

        let tools = session.discover_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(session.state().await, SessionState::ConnectedInitialized);
    }

    #[tokio::test]
    async fn second_initialize_refetches_the_cache() {
        let mock = MockConnector::with_tools(&["old"]);
        let state = mock.handle();
        let session = Session::new(Box::new(mock), true);
        session.initialize().await.unwrap();
        assert_eq!(session.discover_tools().await.unwrap()[0].name, "old");

        // The endpoint's tool set changed; a re-handshake must replace the
        // cache, not append to it
        *state.tools.lock().unwrap() = vec![tool("new")];

        session.initialize().await.unwrap();
        let tools = session.discover_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "new");
    }

    #[tokio::test]
    async fn call_tool_without_auto_connect_fails_fast() {
        let session = Session::new(Box::new(MockConnector::with_tools(&["echo"])), false);
        let result = session.call_tool("echo", None).await;
        assert!(matches!(result, Err(ClientError::NotConnected(_))));
    }

    #[tokio::test]
    async fn call_tool_auto_connects_and_initializes() {
        let session = Session::new(Box::new(MockConnector::with_tools(&["echo"])), true);
        let result = session.call_tool("echo", None).await.unwrap();
        assert!(!result.is_error());
        assert_eq!(session.state().await, SessionState::ConnectedInitialized);
    }

    #[tokio::test]
    async fn disconnect_returns_to_unconnected_from_any_state() {
        let session = Session::new(Box::new(MockConnector::with_tools(&["echo"])), true);
        session.initialize().await.unwrap();

        session.disconnect().await.unwrap();
        assert_eq!(session.state().await, SessionState::Unconnected);
        assert!(!session.is_initialized());

        // Idempotent from the clean state
        session.disconnect().await.unwrap();
        assert_eq!(session.state().await, SessionState::Unconnected);
    }

    #[tokio::test]
    async fn connect_counts_are_not_duplicated_by_initialize() {
        let mock = MockConnector::with_tools(&["echo"]);
        let state = mock.handle();
        let session = Session::new(Box::new(mock), true);
        session.initialize().await.unwrap();

        assert_eq!(state.connect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.initialize_calls.load(Ordering::SeqCst), 1);
    }
}
