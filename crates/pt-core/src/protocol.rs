//! Structured message shapes exchanged through mailboxes
//!
//! Every structured message is the JSON encoding of an object with a
//! `"type"` discriminant, carried inside a [`MailboxMessage::text`]
//! (see [`crate::schema::MailboxMessage`]). Unknown fields are ignored;
//! unknown or malformed messages parse to `None` and are treated as plain
//! DMs by every receiver.

use serde::{Deserialize, Serialize};

/// Outcome a worker reports for the task it just finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletedStatus {
    Completed,
    Failed,
}

/// All structured mailbox messages, leader-bound and worker-bound.
///
/// `requestId` values are UUIDs; receivers keep a bounded seen-set per
/// process lifetime and silently ignore duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WireMessage {
    /// Worker transitioned to idle, optionally reporting a finished task.
    IdleNotification {
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_status: Option<CompletedStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure_reason: Option<String>,
    },

    /// Worker acknowledges a shutdown request and is exiting.
    ShutdownApproved {
        from: String,
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Worker refuses a shutdown request.
    ShutdownRejected {
        from: String,
        request_id: String,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Worker asks for permission before acting on a plan.
    PlanApprovalRequest {
        request_id: String,
        from: String,
        plan: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Audit record of a worker-to-worker DM.
    PeerDmSent {
        from: String,
        to: String,
        summary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Delivery ping for an already-created task file; the task file is
    /// the source of truth.
    TaskAssignment {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assigned_by: Option<String>,
    },

    /// Ask a worker to shut down gracefully.
    ShutdownRequest {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Ask a worker to abort its current (or a specific) task.
    AbortRequest {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Cosmetic session-name hint.
    SetSessionName { name: String },

    /// Lead approved a pending plan.
    PlanApproved {
        request_id: String,
        from: String,
        timestamp: String,
    },

    /// Lead rejected a pending plan with feedback.
    PlanRejected {
        request_id: String,
        from: String,
        feedback: String,
        timestamp: String,
    },
}

impl WireMessage {
    /// Parse a mailbox text as a structured message.
    ///
    /// `None` means the text is not a recognized structured message and
    /// should be handled as a plain DM.
    pub fn parse(text: &str) -> Option<WireMessage> {
        serde_json::from_str(text.trim()).ok()
    }

    /// JSON encoding suitable for a mailbox `text` field.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: WireMessage) {
        let encoded = msg.encode();
        let decoded = WireMessage::parse(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn roundtrip_all_variants() {
        roundtrip(WireMessage::IdleNotification {
            from: "agent1".into(),
            timestamp: Some("t".into()),
            completed_task_id: Some("1".into()),
            completed_status: Some(CompletedStatus::Completed),
            failure_reason: None,
        });
        roundtrip(WireMessage::ShutdownApproved {
            from: "agent1".into(),
            request_id: "r1".into(),
            timestamp: None,
        });
        roundtrip(WireMessage::ShutdownRejected {
            from: "agent1".into(),
            request_id: "r1".into(),
            reason: "task in flight".into(),
            timestamp: None,
        });
        roundtrip(WireMessage::PlanApprovalRequest {
            request_id: "p1".into(),
            from: "agent1".into(),
            plan: "1. do the thing".into(),
            task_id: Some("3".into()),
            timestamp: None,
        });
        roundtrip(WireMessage::PeerDmSent {
            from: "agent1".into(),
            to: "agent2".into(),
            summary: "shared findings".into(),
            timestamp: Some("t".into()),
        });
        roundtrip(WireMessage::TaskAssignment {
            task_id: "1".into(),
            subject: Some("Write tests".into()),
            description: None,
            assigned_by: Some("team-lead".into()),
        });
        roundtrip(WireMessage::ShutdownRequest {
            request_id: "r1".into(),
            from: Some("team-lead".into()),
            reason: None,
            timestamp: None,
        });
        roundtrip(WireMessage::AbortRequest {
            request_id: "a1".into(),
            from: None,
            task_id: Some("1".into()),
            reason: Some("changed priorities".into()),
            timestamp: None,
        });
        roundtrip(WireMessage::SetSessionName {
            name: "agent1".into(),
        });
        roundtrip(WireMessage::PlanApproved {
            request_id: "p1".into(),
            from: "team-lead".into(),
            timestamp: "t".into(),
        });
        roundtrip(WireMessage::PlanRejected {
            request_id: "p1".into(),
            from: "team-lead".into(),
            feedback: "add error handling".into(),
            timestamp: "t".into(),
        });
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let msg = WireMessage::IdleNotification {
            from: "agent1".into(),
            timestamp: None,
            completed_task_id: Some("1".into()),
            completed_status: Some(CompletedStatus::Failed),
            failure_reason: None,
        };
        let encoded = msg.encode();
        assert!(encoded.contains("\"type\":\"idle_notification\""));
        assert!(encoded.contains("\"completedTaskId\":\"1\""));
        assert!(encoded.contains("\"completedStatus\":\"failed\""));
    }

    #[test]
    fn unknown_type_is_none() {
        assert!(WireMessage::parse(r#"{"type":"telemetry","x":1}"#).is_none());
    }

    #[test]
    fn plain_text_is_none() {
        assert!(WireMessage::parse("just a friendly dm").is_none());
        assert!(WireMessage::parse("").is_none());
    }

    #[test]
    fn malformed_json_is_none() {
        assert!(WireMessage::parse(r#"{"type":"shutdown_request""#).is_none());
        // Missing required requestId.
        assert!(WireMessage::parse(r#"{"type":"shutdown_request"}"#).is_none());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg = WireMessage::parse(
            r#"{"type":"task_assignment","taskId":"7","futureField":{"nested":true}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            WireMessage::TaskAssignment {
                task_id: "7".into(),
                subject: None,
                description: None,
                assigned_by: None,
            }
        );
    }

    #[test]
    fn parse_tolerates_surrounding_whitespace() {
        let msg = WireMessage::parse("  {\"type\":\"set_session_name\",\"name\":\"n\"}\n").unwrap();
        assert_eq!(msg, WireMessage::SetSessionName { name: "n".into() });
    }
}
