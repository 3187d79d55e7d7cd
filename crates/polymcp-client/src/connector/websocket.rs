//! Connector over a persistent WebSocket endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use polymcp_protocol::{
    CallToolResult, InitializeResult, ListResourcesResult, ReadResourceResult, Tool,
};
use polymcp_transport::{TransportType, WebSocketConfig, WebSocketTransport};

use super::{Connector, ConnectorCore};
use crate::error::ClientResult;

/// Socket-backed connector: one JSON-RPC message per text frame over a
/// long-lived WebSocket.
#[derive(Debug)]
pub struct WebSocketConnector {
    core: ConnectorCore,
}

impl WebSocketConnector {
    /// Connector for a bare URL.
    pub fn new(ws_url: String) -> Self {
        Self::with_options(ws_url, None, HashMap::new())
    }

    /// Connector with an optional bearer token and extra handshake headers.
    pub fn with_options(
        ws_url: String,
        auth_token: Option<String>,
        headers: HashMap<String, String>,
    ) -> Self {
        let config = WebSocketConfig {
            url: ws_url,
            auth_token,
            headers,
        };
        Self {
            core: ConnectorCore::new(Arc::new(WebSocketTransport::new(config))),
        }
    }

    /// Override the per-request deadline (default 30 s). Apply before the
    /// first connect.
    pub fn with_request_timeout(self, timeout: std::time::Duration) -> Self {
        Self {
            core: self.core.with_request_timeout(timeout),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }

    fn endpoint(&self) -> String {
        self.core.endpoint()
    }

    async fn is_connected(&self) -> bool {
        self.core.is_connected().await
    }

    async fn connect(&self) -> ClientResult<()> {
        self.core.connect().await
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.core.disconnect().await
    }

    async fn initialize(&self) -> ClientResult<InitializeResult> {
        self.core.initialize().await
    }

    async fn tools(&self) -> ClientResult<Vec<Tool>> {
        self.core.tools()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> ClientResult<CallToolResult> {
        self.core.call_tool(name, arguments).await
    }

    async fn list_resources(&self) -> ClientResult<ListResourcesResult> {
        self.core.list_resources().await
    }

    async fn read_resource(&self, uri: &str) -> ClientResult<ReadResourceResult> {
        self.core.read_resource(uri).await
    }

    async fn ping(&self) -> ClientResult<()> {
        self.core.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    #[tokio::test]
    async fn call_tool_while_disconnected_is_not_connected() {
        let connector = WebSocketConnector::new("ws://127.0.0.1:9/".to_string());
        let result = connector.call_tool("anything", None).await;
        assert!(matches!(result, Err(ClientError::NotConnected(_))));
    }

    #[test]
    fn endpoint_is_the_url() {
        let connector = WebSocketConnector::new("ws://example.test/mcp".to_string());
        assert_eq!(connector.endpoint(), "ws://example.test/mcp");
        assert_eq!(connector.transport_type(), TransportType::WebSocket);
    }
}
