use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::identity::AgentId;

/// Kind of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    #[default]
    Notification,
    Broadcast,
    Heartbeat,
    Handshake,
    Error,
}

/// Delivery priority of a message. Lower value is delivered first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl MessagePriority {
    /// All priorities, most urgent first.
    pub const ALL: [MessagePriority; 4] = [
        MessagePriority::Critical,
        MessagePriority::High,
        MessagePriority::Medium,
        MessagePriority::Low,
    ];

    /// Numeric rank (1 = most urgent).
    pub fn value(&self) -> u8 {
        match self {
            MessagePriority::Critical => 1,
            MessagePriority::High => 2,
            MessagePriority::Medium => 3,
            MessagePriority::Low => 4,
        }
    }
}

/// How a message is routed to its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Direct,
    Reliable,
    Broadcast,
    Multicast,
}

/// The signed wire message exchanged between agents.
///
/// Timestamps serialize as ISO-8601. The `signature` field covers the
/// canonical (field-sorted JSON) form of every other field and is
/// produced/checked by [`crate::SecurityManager`]. A message is consumed
/// exactly once by its addressee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub sender_id: AgentId,
    /// Receiver agent id, or `"*"` for broadcast.
    pub receiver_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub delivery_mode: DeliveryMode,
    #[serde(default)]
    pub content: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Message {
    pub fn new(
        sender_id: AgentId,
        receiver_id: impl Into<String>,
        message_type: MessageType,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            sender_id,
            receiver_id: receiver_id.into(),
            message_type,
            priority: MessagePriority::Medium,
            delivery_mode: DeliveryMode::Direct,
            content: Map::new(),
            metadata: Map::new(),
            timestamp: Utc::now(),
            expires_at: None,
            correlation_id: None,
            signature: None,
        }
    }

    pub fn with_content(mut self, content: Map<String, Value>) -> Self {
        self.content = content;
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expiry) => Utc::now() > expiry,
            None => false,
        }
    }

    /// Build a response to this message, echoing the correlation id back
    /// to the requester.
    pub fn reply(&self, sender_id: AgentId, content: Map<String, Value>) -> Message {
        let mut response = Message::new(sender_id, self.sender_id.to_string(), MessageType::Response);
        response.correlation_id = self.correlation_id.clone();
        response.content = content;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_defaults() {
        let msg = Message::new(AgentId::new("a"), "b", MessageType::Notification);
        assert_eq!(msg.priority, MessagePriority::Medium);
        assert_eq!(msg.delivery_mode, DeliveryMode::Direct);
        assert!(msg.correlation_id.is_none());
        assert!(!msg.is_expired());
    }

    #[test]
    fn test_expiry() {
        let mut msg = Message::new(AgentId::new("a"), "b", MessageType::Notification);
        msg.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(msg.is_expired());
    }

    #[test]
    fn test_reply_carries_correlation() {
        let mut request = Message::new(AgentId::new("a"), "b", MessageType::Request);
        request.correlation_id = Some("corr-1".to_string());

        let response = request.reply(AgentId::new("b"), Map::new());
        assert_eq!(response.receiver_id, "a");
        assert_eq!(response.message_type, MessageType::Response);
        assert_eq!(response.correlation_id.as_deref(), Some("corr-1"));
    }

    #[test]
    fn test_wire_roundtrip() {
        let mut msg = Message::new(AgentId::new("sender"), "receiver", MessageType::Request);
        msg.content
            .insert("action".to_string(), Value::String("echo".to_string()));
        msg.correlation_id = Some("corr-42".to_string());

        let bytes = serde_json::to_vec(&msg).unwrap();
        let restored: Message = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(restored.message_id, msg.message_id);
        assert_eq!(restored.sender_id, msg.sender_id);
        assert_eq!(restored.message_type, MessageType::Request);
        assert_eq!(restored.content["action"], "echo");
        assert_eq!(restored.correlation_id.as_deref(), Some("corr-42"));
    }

    #[test]
    fn test_absent_optionals_not_serialized() {
        let msg = Message::new(AgentId::new("a"), "b", MessageType::Notification);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("expires_at"));
        assert!(!json.contains("correlation_id"));
        assert!(!json.contains("signature"));
    }
}
