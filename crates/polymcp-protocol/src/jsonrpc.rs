//! JSON-RPC 2.0 envelope types.
//!
//! Every MCP message is a JSON-RPC request, notification, or response.
//! Message ids may be strings or integers on the wire; [`MessageId`] keeps
//! both representations intact so responses correlate back to the exact id
//! the request carried.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The protocol version tag. Serializes to exactly `"2.0"` and rejects
/// anything else on deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == "2.0" {
            Ok(Self)
        } else {
            Err(DeError::custom(format!(
                "unsupported JSON-RPC version: {version}"
            )))
        }
    }
}

/// A request or response id: string or integer, per JSON-RPC 2.0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// String identifier
    String(String),
    /// Numeric identifier
    Number(i64),
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<u64> for MessageId {
    fn from(n: u64) -> Self {
        Self::String(n.to_string())
    }
}

/// A JSON-RPC request expecting a correlated response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version tag
    pub jsonrpc: JsonRpcVersion,
    /// Request identifier echoed back in the response
    pub id: MessageId,
    /// Method name (e.g. `tools/call`)
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request for `method` with the given id and optional params.
    pub fn new(
        id: impl Into<MessageId>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC notification: fire-and-forget, no id, no response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version tag
    pub jsonrpc: JsonRpcVersion,
    /// Method name (e.g. `notifications/initialized`)
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Build a notification for `method` with optional params.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC response: carries either a result or an error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version tag
    pub jsonrpc: JsonRpcVersion,
    /// Id of the request this responds to
    pub id: MessageId,
    /// Success payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The success payload, if this is a success response.
    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    /// The error object, if this is an error response.
    pub fn error(&self) -> Option<&JsonRpcError> {
        self.error.as_ref()
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_serializes_with_version_tag() {
        let request = JsonRpcRequest::new(1i64, "tools/list", None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})
        );
    }

    #[test]
    fn string_and_numeric_ids_round_trip() {
        let text: MessageId = serde_json::from_str(r#""req-7""#).unwrap();
        assert_eq!(text, MessageId::String("req-7".to_string()));

        let number: MessageId = serde_json::from_str("42").unwrap();
        assert_eq!(number, MessageId::Number(42));
        assert_eq!(serde_json::to_string(&number).unwrap(), "42");
    }

    #[test]
    fn rejects_wrong_version() {
        let raw = r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#;
        assert!(serde_json::from_str::<JsonRpcRequest>(raw).is_err());
    }

    #[test]
    fn response_accessors() {
        let raw = r#"{"jsonrpc":"2.0","id":"a","result":{"ok":true}}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert!(response.error().is_none());
        assert_eq!(response.result().unwrap()["ok"], true);

        let raw = r#"{"jsonrpc":"2.0","id":"a","error":{"code":-32601,"message":"no such method"}}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.error().unwrap().code, -32601);
    }

    #[test]
    fn notification_has_no_id() {
        let notification = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_value(&notification).unwrap();
        assert!(json.get("id").is_none());
    }
}
