//! Team configuration schema

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Schema version written into every `config.json`.
pub const TEAM_CONFIG_VERSION: u32 = 1;

/// Role of a team member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Lead,
    Worker,
}

/// Presence of a team member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Online,
    Offline,
}

/// One member of a team (the lead or a worker)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    /// Sanitized member name (also the mailbox recipient name)
    pub name: String,

    pub role: MemberRole,

    pub status: MemberStatus,

    /// ISO 8601 timestamp when the member first joined; never rewritten
    pub added_at: String,

    /// ISO 8601 timestamp of the member's last observed activity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<String>,

    /// Path to the member's session transcript, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_file: Option<String>,

    /// Working directory the member was started in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Free-form metadata (spawn mode, shutdown request ids, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, serde_json::Value>,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl TeamMember {
    pub fn new(name: impl Into<String>, role: MemberRole) -> Self {
        Self {
            name: name.into(),
            role,
            status: MemberStatus::Online,
            added_at: chrono::Utc::now().to_rfc3339(),
            last_seen_at: None,
            session_file: None,
            cwd: None,
            meta: HashMap::new(),
            unknown_fields: HashMap::new(),
        }
    }
}

/// Team configuration, one `config.json` per team
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
    pub version: u32,

    pub team_id: String,

    /// Default task-list namespace, usually equal to `team_id`
    pub task_list_id: String,

    /// Sanitized name of the lead member
    pub lead_name: String,

    /// Opaque UI style selector
    pub style: String,

    pub created_at: String,

    pub updated_at: String,

    /// Ordered member list; exactly one member has `role == lead`
    pub members: Vec<TeamMember>,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl TeamConfig {
    pub fn member(&self, name: &str) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn member_mut(&mut self, name: &str) -> Option<&mut TeamMember> {
        self.members.iter_mut().find(|m| m.name == name)
    }
}
