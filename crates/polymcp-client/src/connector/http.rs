//! Connector over a streamable HTTP endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use polymcp_protocol::{
    CallToolResult, InitializeResult, ListResourcesResult, ReadResourceResult, Tool,
};
use polymcp_transport::{StreamableHttpConfig, StreamableHttpTransport, TransportType};

use super::{Connector, ConnectorCore};
use crate::config::seconds;
use crate::error::ClientResult;

/// Stream-backed connector: HTTP POST per request with responses arriving
/// directly or over a standing SSE stream. Both the establishment timeout
/// and the read-idle timeout come from the server configuration.
#[derive(Debug)]
pub struct HttpConnector {
    core: ConnectorCore,
}

impl HttpConnector {
    /// Connector for a bare URL with default timeouts.
    pub fn new(url: String) -> Self {
        Self::with_options(url, None, None, HashMap::new())
    }

    /// Connector with timeout overrides (seconds) and extra headers.
    pub fn with_options(
        url: String,
        timeout: Option<f64>,
        sse_read_timeout: Option<f64>,
        headers: HashMap<String, String>,
    ) -> Self {
        let mut config = StreamableHttpConfig::new(url);
        if let Some(timeout) = timeout {
            config.connect_timeout = seconds(timeout);
        }
        if let Some(read_timeout) = sse_read_timeout {
            config.sse_read_timeout = seconds(read_timeout);
        }
        config.headers = headers;

        Self {
            core: ConnectorCore::new(Arc::new(StreamableHttpTransport::new(config))),
        }
    }

    /// Override the per-request deadline (default 30 s), independent of the
    /// transport's connect and read timeouts. Apply before the first
    /// connect.
    pub fn with_request_timeout(self, timeout: std::time::Duration) -> Self {
        Self {
            core: self.core.with_request_timeout(timeout),
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
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
