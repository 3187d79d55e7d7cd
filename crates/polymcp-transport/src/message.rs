//! The message envelope transports carry.

use bytes::Bytes;
use polymcp_protocol::MessageId;
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};

/// A single framed message moving through a transport.
///
/// The payload is the raw JSON text of one JSON-RPC message; the id is
/// extracted from it (or generated for id-less notifications) so receivers
/// can correlate without re-parsing.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// Correlation id, mirrored from the JSON-RPC `id` field when present
    pub id: MessageId,
    /// Raw JSON payload
    pub payload: Bytes,
}

impl TransportMessage {
    /// Create a message with an explicit id.
    pub fn new(id: impl Into<MessageId>, payload: Bytes) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Parse one JSON text frame into a message, extracting its `id`.
    ///
    /// Frames without an id (notifications) get a generated UUID id so they
    /// still flow through the channel; empty frames are rejected.
    pub fn from_json_text(text: &str) -> TransportResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TransportError::ProtocolError("Empty message".to_string()));
        }

        let value: serde_json::Value = serde_json::from_str(text)?;

        let id = value
            .get("id")
            .and_then(|id| match id {
                serde_json::Value::String(s) => Some(MessageId::from(s.clone())),
                serde_json::Value::Number(n) => n.as_i64().map(MessageId::from),
                _ => None,
            })
            .unwrap_or_else(|| MessageId::from(Uuid::new_v4().to_string()));

        Ok(Self {
            id,
            payload: Bytes::from(text.to_string()),
        })
    }

    /// Serialize this message to one JSON text frame.
    ///
    /// Payloads with embedded newlines are rejected: every transport here
    /// frames messages as single lines or single frames.
    pub fn to_json_text(&self) -> TransportResult<String> {
        let text = std::str::from_utf8(&self.payload)
            .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;

        if text.contains('\n') || text.contains('\r') {
            return Err(TransportError::ProtocolError(
                "Message contains embedded newlines".to_string(),
            ));
        }

        // Validate JSON before it reaches the wire
        let _: serde_json::Value = serde_json::from_str(text)?;

        Ok(text.to_string())
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_string_and_numeric_ids() {
        let message =
            TransportMessage::from_json_text(r#"{"jsonrpc":"2.0","id":"abc","result":{}}"#)
                .unwrap();
        assert_eq!(message.id, MessageId::from("abc"));

        let message =
            TransportMessage::from_json_text(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#).unwrap();
        assert_eq!(message.id, MessageId::Number(7));
    }

    #[test]
    fn notification_without_id_gets_generated_id() {
        let message = TransportMessage::from_json_text(
            r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#,
        )
        .unwrap();
        assert!(matches!(message.id, MessageId::String(_)));
    }

    #[test]
    fn rejects_empty_and_invalid_frames() {
        assert!(matches!(
            TransportMessage::from_json_text("  "),
            Err(TransportError::ProtocolError(_))
        ));
        assert!(matches!(
            TransportMessage::from_json_text("not json"),
            Err(TransportError::SerializationFailed(_))
        ));
    }

    #[test]
    fn serialization_rejects_embedded_newlines() {
        let message = TransportMessage::new("x", Bytes::from("{\"a\":\n1}"));
        assert!(matches!(
            message.to_json_text(),
            Err(TransportError::ProtocolError(_))
        ));
    }

    #[test]
    fn round_trip() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let message = TransportMessage::from_json_text(raw).unwrap();
        assert_eq!(message.to_json_text().unwrap(), raw);
        assert_eq!(message.size(), raw.len());
    }
}
