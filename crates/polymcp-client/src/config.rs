//! Server endpoint configuration.
//!
//! The connector shape is a tagged union decided ONCE, at deserialization,
//! by which keys are present - with fixed precedence `command` (process) >
//! `ws_url` (socket) > `url` (stream). It is never re-decided later.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

use crate::error::{ClientError, ClientResult};

/// Configuration for one named server endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerConfig {
    /// Locally spawned server process
    Process {
        /// Executable to spawn
        command: String,
        /// Arguments passed to the executable
        args: Vec<String>,
        /// Extra environment variables for the child
        env: HashMap<String, String>,
    },
    /// Persistent WebSocket endpoint
    Socket {
        /// WebSocket URL (`ws://` or `wss://`)
        ws_url: String,
        /// Optional bearer token
        auth_token: Option<String>,
        /// Additional handshake headers
        headers: HashMap<String, String>,
    },
    /// Streamable HTTP endpoint
    Stream {
        /// Endpoint URL
        url: String,
        /// Connection-establishment timeout, in seconds
        timeout: Option<f64>,
        /// Read-idle timeout for the SSE stream, in seconds
        sse_read_timeout: Option<f64>,
        /// Additional request headers
        headers: HashMap<String, String>,
    },
}

/// Raw, shape-agnostic view of a server entry. Inference happens once, in
/// `TryFrom`, after all keys are visible.
#[derive(Debug, Default, Deserialize)]
struct RawServerConfig {
    command: Option<String>,
    args: Option<Vec<String>>,
    env: Option<HashMap<String, String>>,
    ws_url: Option<String>,
    #[serde(alias = "authToken")]
    auth_token: Option<String>,
    url: Option<String>,
    timeout: Option<f64>,
    #[serde(alias = "sseReadTimeout")]
    sse_read_timeout: Option<f64>,
    headers: Option<HashMap<String, String>>,
}

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = ClientError;

    fn try_from(raw: RawServerConfig) -> ClientResult<Self> {
        if let Some(command) = raw.command {
            Ok(Self::Process {
                command,
                args: raw.args.unwrap_or_default(),
                env: raw.env.unwrap_or_default(),
            })
        } else if let Some(ws_url) = raw.ws_url {
            Ok(Self::Socket {
                ws_url,
                auth_token: raw.auth_token,
                headers: raw.headers.unwrap_or_default(),
            })
        } else if let Some(url) = raw.url {
            Ok(Self::Stream {
                url,
                timeout: raw.timeout,
                sse_read_timeout: raw.sse_read_timeout,
                headers: raw.headers.unwrap_or_default(),
            })
        } else {
            Err(ClientError::Config(
                "cannot determine connector type: expected one of 'command', 'ws_url', or 'url'"
                    .to_string(),
            ))
        }
    }
}

impl<'de> Deserialize<'de> for ServerConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawServerConfig::deserialize(deserializer)?;
        Self::try_from(raw).map_err(DeError::custom)
    }
}

impl ServerConfig {
    /// Infer a config from a raw JSON value (one `mcpServers` entry).
    pub fn from_value(value: serde_json::Value) -> ClientResult<Self> {
        serde_json::from_value(value).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Human-readable kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Process { .. } => "process",
            Self::Socket { .. } => "socket",
            Self::Stream { .. } => "stream",
        }
    }

    /// Endpoint description for diagnostics.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Process { command, args, .. } => {
                if args.is_empty() {
                    command.clone()
                } else {
                    format!("{} {}", command, args.join(" "))
                }
            }
            Self::Socket { ws_url, .. } => ws_url.clone(),
            Self::Stream { url, .. } => url.clone(),
        }
    }
}

/// Seconds-valued config field to a `Duration`.
pub(crate) fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

/// The `{"mcpServers": {...}}` document shape produced by the external
/// config-loading collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServersConfig {
    /// Server name to endpoint configuration
    #[serde(rename = "mcpServers")]
    pub mcp_servers: HashMap<String, ServerConfig>,
}

impl ServersConfig {
    /// Parse a full config document from JSON text.
    pub fn from_json(text: &str) -> ClientResult<Self> {
        serde_json::from_str(text).map_err(|e| ClientError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn url_only_infers_stream() {
        let config =
            ServerConfig::from_value(serde_json::json!({"url": "http://h"})).unwrap();
        assert_eq!(config.kind(), "stream");
        assert_eq!(config.endpoint(), "http://h");
    }

    #[test]
    fn command_infers_process() {
        let config = ServerConfig::from_value(
            serde_json::json!({"command": "node", "args": ["s.js"]}),
        )
        .unwrap();
        assert!(matches!(
            &config,
            ServerConfig::Process { command, args, .. }
                if command == "node" && args == &["s.js".to_string()]
        ));
    }

    #[test]
    fn ws_url_infers_socket() {
        let config = ServerConfig::from_value(serde_json::json!({
            "ws_url": "ws://h", "authToken": "t", "headers": {"X-A": "1"}
        }))
        .unwrap();
        assert!(matches!(
            &config,
            ServerConfig::Socket { ws_url, auth_token, headers }
                if ws_url == "ws://h"
                    && auth_token.as_deref() == Some("t")
                    && headers["X-A"] == "1"
        ));
    }

    #[test]
    fn precedence_is_process_over_socket_over_stream() {
        let config = ServerConfig::from_value(serde_json::json!({
            "command": "uv", "ws_url": "ws://h", "url": "http://h"
        }))
        .unwrap();
        assert_eq!(config.kind(), "process");

        let config = ServerConfig::from_value(serde_json::json!({
            "ws_url": "ws://h", "url": "http://h"
        }))
        .unwrap();
        assert_eq!(config.kind(), "socket");
    }

    #[test]
    fn unresolvable_shape_is_a_config_error() {
        let result = ServerConfig::from_value(serde_json::json!({"name": "x"}));
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn servers_document_parses() {
        let config = ServersConfig::from_json(
            r#"{"mcpServers": {"x": {"url": "http://h", "sseReadTimeout": 120.0}}}"#,
        )
        .unwrap();
        assert!(matches!(
            &config.mcp_servers["x"],
            ServerConfig::Stream { sse_read_timeout: Some(t), .. } if (*t - 120.0).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn seconds_clamps_negatives() {
        assert_eq!(seconds(-1.0), Duration::ZERO);
        assert_eq!(seconds(1.5), Duration::from_millis(1500));
    }
}
