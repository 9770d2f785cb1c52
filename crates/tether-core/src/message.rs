//! Message model and wire codec
//!
//! One unit of pub/sub traffic plus the subscription-intent frames the
//! client sends when a topic set changes. Frames travel as JSON text; the
//! payload is opaque to this layer and passed through untouched.

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::types::{MessageId, Timestamp, Topic};

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// One unit of pub/sub traffic. Immutable once constructed.
///
/// Wire shape: `{"id", "type", "topic", "payload", "timestamp", "userId"?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Application-defined tag, `type` on the wire
    #[serde(rename = "type")]
    pub kind: String,
    pub topic: Topic,
    /// Opaque caller-defined payload
    pub payload: serde_json::Value,
    pub timestamp: Timestamp,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Message {
    /// Construct a message stamped at `at` with a freshly generated id
    pub fn new(
        kind: impl Into<String>,
        topic: Topic,
        payload: serde_json::Value,
        user_id: Option<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::generate(at),
            kind: kind.into(),
            topic,
            payload,
            timestamp: at,
            user_id,
        }
    }

    /// Encode for the wire
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode an inbound frame
    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::Malformed)
    }
}

// ----------------------------------------------------------------------------
// Subscription Intent
// ----------------------------------------------------------------------------

/// Direction of a subscription change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// Client-to-server frame announcing a topic subscription change.
///
/// Wire shape: `{"type": "subscribe"|"unsubscribe", "topic", "timestamp"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionIntent {
    #[serde(rename = "type")]
    pub action: SubscriptionAction,
    pub topic: Topic,
    pub timestamp: Timestamp,
}

impl SubscriptionIntent {
    pub fn new(action: SubscriptionAction, topic: Topic, at: Timestamp) -> Self {
        Self {
            action,
            topic,
            timestamp: at,
        }
    }

    /// Encode for the wire
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let message = Message::new(
            "chat",
            Topic::new("general"),
            serde_json::json!({"text": "hello"}),
            Some("user-7".to_string()),
            Timestamp::new(1_700_000_000_000),
        );

        let frame = message.to_frame().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value["type"], "chat");
        assert_eq!(value["topic"], "general");
        assert_eq!(value["payload"]["text"], "hello");
        assert_eq!(value["timestamp"], 1_700_000_000_000u64);
        assert_eq!(value["userId"], "user-7");
    }

    #[test]
    fn test_user_id_omitted_when_absent() {
        let message = Message::new(
            "chat",
            Topic::new("general"),
            serde_json::Value::Null,
            None,
            Timestamp::new(1),
        );

        let frame = message.to_frame().unwrap();
        assert!(!frame.contains("userId"));
    }

    #[test]
    fn test_inbound_frame_decodes() {
        let frame = r#"{
            "id": "msg-42-abc",
            "type": "price",
            "topic": "ticker",
            "payload": {"value": 9.5},
            "timestamp": 42,
            "userId": "u1"
        }"#;

        let message = Message::from_frame(frame).unwrap();
        assert_eq!(message.kind, "price");
        assert_eq!(message.topic, Topic::new("ticker"));
        assert_eq!(message.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_malformed_frame_is_protocol_error() {
        let err = Message::from_frame("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));

        // Valid JSON missing required fields is malformed too
        let err = Message::from_frame(r#"{"topic": "a"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_subscription_intent_wire_shape() {
        let intent = SubscriptionIntent::new(
            SubscriptionAction::Subscribe,
            Topic::new("general"),
            Timestamp::new(7),
        );

        let value: serde_json::Value =
            serde_json::from_str(&intent.to_frame().unwrap()).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["topic"], "general");
        assert_eq!(value["timestamp"], 7);

        let intent = SubscriptionIntent::new(
            SubscriptionAction::Unsubscribe,
            Topic::new("general"),
            Timestamp::new(8),
        );
        let value: serde_json::Value =
            serde_json::from_str(&intent.to_frame().unwrap()).unwrap();
        assert_eq!(value["type"], "unsubscribe");
    }
}
