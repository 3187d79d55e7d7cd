//! Connector over a locally spawned server process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use polymcp_protocol::{
    CallToolResult, InitializeResult, ListResourcesResult, ReadResourceResult, Tool,
};
use polymcp_transport::{ProcessTransport, TransportType};

use super::{Connector, ConnectorCore};
use crate::error::ClientResult;

/// Process-backed connector: spawns the configured command on connect and
/// speaks NDJSON over its piped stdio. A process that exits before the
/// pipes are ready fails the connect attempt; an exit afterwards fails the
/// next operation.
#[derive(Debug)]
pub struct ProcessConnector {
    core: ConnectorCore,
}

impl ProcessConnector {
    /// Connector that will spawn `command` with `args` and `env`.
    pub fn new(command: String, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self::from_transport(ProcessTransport::new(command, args, env))
    }

    /// Connector over an existing process transport (including one built
    /// with [`ProcessTransport::from_raw`]).
    pub fn from_transport(transport: ProcessTransport) -> Self {
        Self {
            core: ConnectorCore::new(Arc::new(transport)),
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
impl Connector for ProcessConnector {
    fn transport_type(&self) -> TransportType {
        TransportType::Process
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
