//! Connectors: transport-specific connect/disconnect plus the protocol
//! operations for one endpoint.
//!
//! Three variants back the three endpoint kinds - [`ProcessConnector`],
//! [`WebSocketConnector`], and [`HttpConnector`]. Each exclusively owns
//! zero-or-one live transport handle and a lazily-populated tool cache;
//! the shared protocol behavior lives in [`ConnectorCore`].

mod http;
mod process;
mod rpc;
mod websocket;

pub use http::HttpConnector;
pub use process::ProcessConnector;
pub use websocket::WebSocketConnector;

use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use polymcp_protocol::{
    CallToolResult, ClientCapabilities, ContentBlock, EmptyResult, Implementation,
    InitializeRequest, InitializeResult, ListResourcesResult, ListToolsResult,
    ReadResourceResult, Tool, PROTOCOL_VERSION,
};
use polymcp_transport::{Transport, TransportType};
use tracing::debug;

use crate::config::ServerConfig;
use crate::connection::{ConnectionHandler, ConnectionManager};
use crate::error::{ClientError, ClientResult};
use rpc::RpcChannel;

/// Protocol operations over one connected endpoint.
///
/// `connect` is idempotent per lifecycle; `disconnect` releases the
/// transport and clears the tool cache, and is a safe no-op after a failed
/// or absent connect; `initialize` performs the handshake and populates the
/// tool cache, failing with a not-connected error before a successful
/// connect; `tools` returns the cache or fails with a not-initialized
/// error.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// The transport kind behind this connector.
    fn transport_type(&self) -> TransportType;

    /// Endpoint identifier for diagnostics.
    fn endpoint(&self) -> String;

    /// Whether the underlying transport is currently connected.
    async fn is_connected(&self) -> bool;

    /// Establish the transport channel.
    async fn connect(&self) -> ClientResult<()>;

    /// Release the transport and clear the tool cache.
    async fn disconnect(&self) -> ClientResult<()>;

    /// Perform the protocol handshake and populate the tool cache.
    /// Calling it again re-fetches the cache rather than appending.
    async fn initialize(&self) -> ClientResult<InitializeResult>;

    /// The cached tool set.
    async fn tools(&self) -> ClientResult<Vec<Tool>>;

    /// Invoke a named remote tool.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> ClientResult<CallToolResult>;

    /// List the resources the endpoint exposes.
    async fn list_resources(&self) -> ClientResult<ListResourcesResult>;

    /// Read one resource by URI.
    async fn read_resource(&self, uri: &str) -> ClientResult<ReadResourceResult>;

    /// Protocol-level health check.
    async fn ping(&self) -> ClientResult<()>;
}

/// Build the connector matching a config's shape. The variant is decided
/// here, once, and never re-decided.
pub fn connector_for_config(config: &ServerConfig) -> Box<dyn Connector> {
    match config {
        ServerConfig::Process { command, args, env } => Box::new(ProcessConnector::new(
            command.clone(),
            args.clone(),
            env.clone(),
        )),
        ServerConfig::Socket {
            ws_url,
            auth_token,
            headers,
        } => Box::new(WebSocketConnector::with_options(
            ws_url.clone(),
            auth_token.clone(),
            headers.clone(),
        )),
        ServerConfig::Stream {
            url,
            timeout,
            sse_read_timeout,
            headers,
        } => Box::new(HttpConnector::with_options(
            url.clone(),
            *timeout,
            *sse_read_timeout,
            headers.clone(),
        )),
    }
}

/// Adapts a transport's connect/disconnect pair to the generic
/// [`ConnectionHandler`] contract, so every connector gets the manager's
/// single-flight dedup and start/stop ordering for free.
pub(crate) struct TransportHandler {
    transport: Arc<dyn Transport>,
}

#[async_trait]
impl ConnectionHandler for TransportHandler {
    type Connection = Arc<dyn Transport>;

    async fn establish(&self) -> ClientResult<Arc<dyn Transport>> {
        self.transport.connect().await?;
        Ok(Arc::clone(&self.transport))
    }

    async fn close(&self, connection: &Arc<dyn Transport>) -> ClientResult<()> {
        connection.disconnect().await.map_err(Into::into)
    }
}

/// Shared state and protocol behavior behind every connector variant.
pub(crate) struct ConnectorCore {
    transport: Arc<dyn Transport>,
    manager: ConnectionManager<TransportHandler>,
    rpc: RpcChannel,
    tools: StdRwLock<Option<Vec<Tool>>>,
    client_info: Implementation,
}

impl ConnectorCore {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        let rpc = RpcChannel::new(Arc::clone(&transport), rpc::DEFAULT_REQUEST_TIMEOUT);
        let manager = ConnectionManager::new(TransportHandler {
            transport: Arc::clone(&transport),
        });
        Self {
            transport,
            manager,
            rpc,
            tools: StdRwLock::new(None),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
            },
        }
    }

    /// Replace the per-request deadline. Only meaningful before the first
    /// connect, so the channel has no pending requests to disturb.
    pub(crate) fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.rpc = RpcChannel::new(Arc::clone(&self.transport), timeout);
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    pub(crate) async fn is_connected(&self) -> bool {
        self.transport.is_connected().await
    }

    pub(crate) async fn connect(&self) -> ClientResult<()> {
        // The manager deduplicates concurrent attempts; joining callers
        // all observe the one outcome
        self.manager.start().await?;
        self.rpc.start().await;
        debug!("connector connected: {}", self.endpoint());
        Ok(())
    }

    pub(crate) async fn disconnect(&self) -> ClientResult<()> {
        self.rpc.stop().await;
        // Close errors are logged inside the manager; teardown converges
        self.manager.stop().await?;
        *self.tools.write().expect("tools lock poisoned") = None;
        debug!("connector disconnected: {}", self.endpoint());
        Ok(())
    }

    pub(crate) async fn initialize(&self) -> ClientResult<InitializeResult> {
        if !self.transport.is_connected().await {
            return Err(ClientError::NotConnected(
                "initialize called before connect".to_string(),
            ));
        }

        let params = InitializeRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: self.client_info.clone(),
        };
        let result: InitializeResult = self
            .rpc
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;

        self.rpc.notify("notifications/initialized", None).await?;

        // Re-fetch on every handshake: the cache is replaced, not appended
        let tools: ListToolsResult = self.rpc.request("tools/list", None).await?;
        debug!(
            "initialized {} ({} tools)",
            self.endpoint(),
            tools.tools.len()
        );
        *self.tools.write().expect("tools lock poisoned") = Some(tools.tools);

        Ok(result)
    }

    pub(crate) fn tools(&self) -> ClientResult<Vec<Tool>> {
        self.tools
            .read()
            .expect("tools lock poisoned")
            .clone()
            .ok_or_else(|| {
                ClientError::NotInitialized(
                    "tools requested before initialize completed".to_string(),
                )
            })
    }

    pub(crate) async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> ClientResult<CallToolResult> {
        if !self.transport.is_connected().await {
            return Err(ClientError::NotConnected(format!(
                "cannot call tool '{name}' while disconnected"
            )));
        }

        let params = serde_json::json!({
            "name": name,
            "arguments": arguments.unwrap_or_else(|| serde_json::json!({})),
        });

        let result: CallToolResult = self
            .rpc
            .request("tools/call", Some(params))
            .await
            .map_err(|e| match e {
                ClientError::Protocol(message) => ClientError::ToolExecution {
                    name: name.to_string(),
                    message,
                },
                other => other,
            })?;

        if result.is_error() {
            let message = result
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text(text) => Some(text.text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ClientError::ToolExecution {
                name: name.to_string(),
                message: if message.is_empty() {
                    "tool reported an error".to_string()
                } else {
                    message
                },
            });
        }

        Ok(result)
    }

    pub(crate) async fn list_resources(&self) -> ClientResult<ListResourcesResult> {
        if !self.transport.is_connected().await {
            return Err(ClientError::NotConnected(
                "cannot list resources while disconnected".to_string(),
            ));
        }
        self.rpc.request("resources/list", None).await
    }

    pub(crate) async fn read_resource(&self, uri: &str) -> ClientResult<ReadResourceResult> {
        if !self.transport.is_connected().await {
            return Err(ClientError::NotConnected(format!(
                "cannot read resource '{uri}' while disconnected"
            )));
        }
        self.rpc
            .request("resources/read", Some(serde_json::json!({ "uri": uri })))
            .await
    }

    pub(crate) async fn ping(&self) -> ClientResult<()> {
        if !self.transport.is_connected().await {
            return Err(ClientError::NotConnected(
                "cannot ping while disconnected".to_string(),
            ));
        }
        let _: EmptyResult = self.rpc.request("ping", None).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ConnectorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorCore")
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

/// Test double shared by the session, client, and manager tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use polymcp_protocol::{ContentBlock, ServerCapabilities, ToolInputSchema};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Observable innards of a [`MockConnector`]. Tests keep a handle to
    /// flip failure knobs and read counters after the connector is boxed.
    #[derive(Debug, Default)]
    pub(crate) struct MockState {
        pub(crate) connected: AtomicBool,
        pub(crate) initialized: AtomicBool,
        pub(crate) fail_connect: AtomicBool,
        pub(crate) fail_initialize: AtomicBool,
        pub(crate) fail_disconnect: AtomicBool,
        pub(crate) tools: StdMutex<Vec<Tool>>,
        pub(crate) connect_calls: AtomicUsize,
        pub(crate) initialize_calls: AtomicUsize,
        pub(crate) tools_calls: AtomicUsize,
        pub(crate) call_tool_calls: AtomicUsize,
    }

    #[derive(Debug, Default)]
    pub(crate) struct MockConnector {
        pub(crate) state: Arc<MockState>,
    }

    pub(crate) fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            title: None,
            description: None,
            input_schema: ToolInputSchema::default(),
        }
    }

    impl MockConnector {
        pub(crate) fn with_tools(names: &[&str]) -> Self {
            let mock = Self::default();
            *mock.state.tools.lock().unwrap() = names.iter().map(|n| tool(n)).collect();
            mock
        }

        pub(crate) fn connected_with_tools(names: &[&str]) -> Self {
            let mock = Self::with_tools(names);
            mock.state.connected.store(true, Ordering::SeqCst);
            mock
        }

        pub(crate) fn handle(&self) -> Arc<MockState> {
            Arc::clone(&self.state)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        fn transport_type(&self) -> TransportType {
            TransportType::Process
        }

        fn endpoint(&self) -> String {
            "mock://".to_string()
        }

        async fn is_connected(&self) -> bool {
            self.state.connected.load(Ordering::SeqCst)
        }

        async fn connect(&self) -> ClientResult<()> {
            self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_connect.load(Ordering::SeqCst) {
                return Err(ClientError::Connection("mock refused".to_string()));
            }
            self.state.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> ClientResult<()> {
            self.state.connected.store(false, Ordering::SeqCst);
            self.state.initialized.store(false, Ordering::SeqCst);
            if self.state.fail_disconnect.load(Ordering::SeqCst) {
                return Err(ClientError::Connection("mock close failed".to_string()));
            }
            Ok(())
        }

        async fn initialize(&self) -> ClientResult<InitializeResult> {
            self.state.initialize_calls.fetch_add(1, Ordering::SeqCst);
            if !self.state.connected.load(Ordering::SeqCst) {
                return Err(ClientError::NotConnected("mock not connected".to_string()));
            }
            if self.state.fail_initialize.load(Ordering::SeqCst) {
                return Err(ClientError::Connection("mock handshake failed".to_string()));
            }
            self.state.initialized.store(true, Ordering::SeqCst);
            Ok(InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: ServerCapabilities::default(),
                server_info: Implementation {
                    name: "mock-server".to_string(),
                    version: "0.0.0".to_string(),
                    title: None,
                },
                instructions: None,
            })
        }

        async fn tools(&self) -> ClientResult<Vec<Tool>> {
            self.state.tools_calls.fetch_add(1, Ordering::SeqCst);
            if !self.state.initialized.load(Ordering::SeqCst) {
                return Err(ClientError::NotInitialized(
                    "mock not initialized".to_string(),
                ));
            }
            Ok(self.state.tools.lock().unwrap().clone())
        }

        async fn call_tool(
            &self,
            name: &str,
            _arguments: Option<serde_json::Value>,
        ) -> ClientResult<CallToolResult> {
            self.state.call_tool_calls.fetch_add(1, Ordering::SeqCst);
            if !self.state.connected.load(Ordering::SeqCst) {
                return Err(ClientError::NotConnected("mock not connected".to_string()));
            }
            Ok(CallToolResult {
                content: vec![ContentBlock::text(format!("ran {name}"))],
                is_error: Some(false),
            })
        }

        async fn list_resources(&self) -> ClientResult<ListResourcesResult> {
            Ok(ListResourcesResult {
                resources: Vec::new(),
                next_cursor: None,
            })
        }

        async fn read_resource(&self, _uri: &str) -> ClientResult<ReadResourceResult> {
            Ok(ReadResourceResult {
                contents: Vec::new(),
            })
        }

        async fn ping(&self) -> ClientResult<()> {
            if !self.state.connected.load(Ordering::SeqCst) {
                return Err(ClientError::NotConnected("mock not connected".to_string()));
            }
            Ok(())
        }
    }
}
