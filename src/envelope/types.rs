//! Envelope and frame types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Extension key carrying the single-use replay nonce.
pub const NONCE_EXTENSION: &str = "nonce";

/// Protocol message wrapper.
///
/// Envelopes arrive here already schema-validated; this crate only reads the fields
/// it needs for delivery and replay protection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Globally unique id assigned by the sender; receivers deduplicate on it.
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub payload_type: String,
    /// Creation time. Missing timestamps fail replay validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl Envelope {
    /// Build an envelope with a fresh id and the current timestamp.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            recipient: recipient.into(),
            payload_type: payload_type.into(),
            timestamp: Some(Utc::now()),
            payload,
            extensions: Map::new(),
        }
    }

    /// Attach a random single-use nonce.
    pub fn with_nonce(self) -> Self {
        self.with_extension(NONCE_EXTENSION, Value::String(Uuid::new_v4().simple().to_string()))
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Raw nonce extension, if present.
    pub fn nonce(&self) -> Option<&Value> {
        self.extensions.get(NONCE_EXTENSION)
    }
}

/// A frame on a persistent connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// A protocol message.
    Envelope(Envelope),
    /// Confirmation that the peer accepted `message_id`.
    Ack { message_id: String },
}

impl Frame {
    pub fn ack(message_id: impl Into<String>) -> Self {
        Frame::Ack {
            message_id: message_id.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_envelope() {
        let env = Envelope::new("agent-a", "agent-b", "task.request", json!({"task": "sum"}));
        assert!(Uuid::parse_str(&env.id).is_ok());
        assert!(env.timestamp.is_some());
        assert!(env.nonce().is_none());

        let other = Envelope::new("agent-a", "agent-b", "task.request", Value::Null);
        assert_ne!(env.id, other.id);
    }

    #[test]
    fn test_nonce_extension() {
        let env = Envelope::new("a", "b", "tool.call", Value::Null).with_nonce();
        let nonce = env.nonce().and_then(Value::as_str).unwrap();
        assert_eq!(nonce.len(), 32);
    }

    #[test]
    fn test_frame_tagging() {
        let ack = Frame::ack("m-1");
        assert_eq!(ack.encode().unwrap(), r#"{"kind":"ack","message_id":"m-1"}"#);

        let env = Envelope::new("a", "b", "task.request", json!({"n": 1}));
        let text = Frame::Envelope(env.clone()).encode().unwrap();
        assert!(text.starts_with(r#"{"kind":"envelope""#));
        assert_eq!(Frame::decode(&text).unwrap(), Frame::Envelope(env));
    }

    #[test]
    fn test_missing_timestamp_deserializes() {
        let env: Envelope = serde_json::from_value(json!({
            "id": "m-1",
            "sender": "a",
            "recipient": "b",
            "payload_type": "task.request"
        }))
        .unwrap();
        assert!(env.timestamp.is_none());
        assert!(env.extensions.is_empty());
    }
}
