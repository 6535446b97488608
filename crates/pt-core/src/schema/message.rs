//! Mailbox message schema

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message in an agent's inbox
///
/// Messages are stored as an append-order JSON array per recipient at
/// `<teamDir>/mailboxes/<namespace>/inboxes/<agentName>.json`. Structured
/// control messages carry JSON in `text` (see [`crate::protocol`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxMessage {
    /// Sender agent name or the team lead's name
    pub from: String,

    /// Message content; structured messages carry a JSON object here
    pub text: String,

    /// ISO 8601 UTC timestamp
    pub timestamp: String,

    /// Whether the recipient has popped the message
    pub read: bool,

    /// Optional display color hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl MailboxMessage {
    /// Build an unread message stamped with the current time.
    pub fn new(from: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            text: text.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            read: false,
            color: None,
            unknown_fields: HashMap::new(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_minimal() {
        let json = r#"{
            "from": "team-lead",
            "text": "hello",
            "timestamp": "2026-07-30T14:30:00Z",
            "read": false
        }"#;

        let msg: MailboxMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.from, "team-lead");
        assert_eq!(msg.text, "hello");
        assert!(!msg.read);
        assert!(msg.color.is_none());

        let serialized = serde_json::to_string(&msg).unwrap();
        let reparsed: MailboxMessage = serde_json::from_str(&serialized).unwrap();
        assert_eq!(msg.text, reparsed.text);
    }

    #[test]
    fn roundtrip_preserves_unknown_fields() {
        let json = r#"{
            "from": "agent1",
            "text": "hi",
            "timestamp": "2026-07-30T14:30:00Z",
            "read": true,
            "color": "blue",
            "futureFeature": {"nested": true}
        }"#;

        let msg: MailboxMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.color.as_deref(), Some("blue"));
        assert!(msg.unknown_fields.contains_key("futureFeature"));

        let serialized = serde_json::to_string(&msg).unwrap();
        let reparsed: MailboxMessage = serde_json::from_str(&serialized).unwrap();
        assert_eq!(msg.unknown_fields.len(), reparsed.unknown_fields.len());
    }

    #[test]
    fn new_is_unread_and_stamped() {
        let msg = MailboxMessage::new("agent1", "ping");
        assert!(!msg.read);
        assert!(!msg.timestamp.is_empty());
    }
}
