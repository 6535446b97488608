//! Task schema types for team coordination

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created but not started
    Pending,
    /// Task currently being worked on
    InProgress,
    /// Task finished
    Completed,
}

/// Task item stored as one JSON file per task
///
/// Ids are stringified positive integers allocated monotonically per task
/// list. Dependency edges are mirrored: every id in `blocked_by` has a file
/// whose `blocks` contains this task's id, and vice versa.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamTask {
    /// Unique task identifier (sequential string: "1", "2", "3")
    pub id: String,

    /// Brief imperative title (first-line slice of the description, ≤120 chars)
    pub subject: String,

    /// Detailed requirements
    pub description: String,

    /// Agent name assigned to this task (absent if unassigned)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Current task status
    pub status: TaskStatus,

    /// Task ids that depend on this task completing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,

    /// Task ids that must complete before this task can start
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,

    /// Custom key-value pairs (completion results, abort records, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// ISO 8601 timestamp when the task was created
    pub created_at: String,

    /// ISO 8601 timestamp when the task was last updated
    pub updated_at: String,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl TeamTask {
    /// Numeric value of the id, for natural ordering. Non-numeric ids sort last.
    pub fn numeric_id(&self) -> u64 {
        self.id.parse().unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn roundtrip_minimal() {
        let json = r#"{
            "id": "1",
            "subject": "Write tests",
            "description": "Write unit tests",
            "status": "pending",
            "createdAt": "2026-07-30T14:30:00Z",
            "updatedAt": "2026-07-30T14:30:00Z"
        }"#;

        let task: TeamTask = serde_json::from_str(json).unwrap();
        assert_eq!(task.id, "1");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.owner.is_none());
        assert!(task.blocks.is_empty());
        assert!(task.blocked_by.is_empty());
        assert!(task.metadata.is_empty());

        let serialized = serde_json::to_string(&task).unwrap();
        assert!(serialized.contains("\"createdAt\":"));
        let reparsed: TeamTask = serde_json::from_str(&serialized).unwrap();
        assert_eq!(task.id, reparsed.id);
    }

    #[test]
    fn roundtrip_complete() {
        let json = r#"{
            "id": "2",
            "subject": "Fix auth timeout",
            "description": "Investigate and fix timeout issues",
            "owner": "agent1",
            "status": "in_progress",
            "blocks": ["3"],
            "blockedBy": ["1"],
            "metadata": {"priority": "high"},
            "createdAt": "2026-07-30T14:30:00Z",
            "updatedAt": "2026-07-30T14:35:00Z",
            "futureField": 7
        }"#;

        let task: TeamTask = serde_json::from_str(json).unwrap();
        assert_eq!(task.owner.as_deref(), Some("agent1"));
        assert_eq!(task.blocked_by, vec!["1"]);
        assert_eq!(task.blocks, vec!["3"]);
        assert_eq!(task.metadata.get("priority").unwrap(), "high");
        assert!(task.unknown_fields.contains_key("futureField"));

        let serialized = serde_json::to_string(&task).unwrap();
        let reparsed: TeamTask = serde_json::from_str(&serialized).unwrap();
        assert_eq!(task.blocked_by, reparsed.blocked_by);
        assert_eq!(task.unknown_fields.len(), reparsed.unknown_fields.len());
    }

    #[test]
    fn numeric_id_ordering() {
        let json = r#"{
            "id": "10",
            "subject": "s",
            "description": "d",
            "status": "pending",
            "createdAt": "t",
            "updatedAt": "t"
        }"#;
        let task: TeamTask = serde_json::from_str(json).unwrap();
        assert_eq!(task.numeric_id(), 10);
    }
}
