//! Per-teammate activity tracking fed from agent events.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Rolling view of what one teammate is doing.
#[derive(Debug, Clone, Default)]
pub struct TeammateActivity {
    pub tool_count: u64,
    pub output_tokens: u64,
    pub current_tool: Option<String>,
    pub streaming: bool,
}

/// Tracker shared by the leader runtime and its event subscriptions.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    entries: Mutex<HashMap<String, TeammateActivity>>,
}

impl ActivityTracker {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, TeammateActivity>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fold one agent event into the teammate's activity.
    pub fn observe(&self, name: &str, event: &Value) {
        let mut entries = self.entries();
        let activity = entries.entry(name.to_string()).or_default();
        match event.get("type").and_then(Value::as_str) {
            Some("agent_start") => {
                activity.streaming = true;
            }
            Some("agent_end") => {
                activity.streaming = false;
                activity.current_tool = None;
            }
            Some("message_update") => {
                if let Some(tool) = event
                    .pointer("/toolUseEvent/name")
                    .and_then(Value::as_str)
                {
                    activity.tool_count += 1;
                    activity.current_tool = Some(tool.to_string());
                }
                if let Some(tokens) = event
                    .pointer("/usage/outputTokens")
                    .and_then(Value::as_u64)
                {
                    activity.output_tokens += tokens;
                }
            }
            _ => {}
        }
    }

    pub fn get(&self, name: &str) -> Option<TeammateActivity> {
        self.entries().get(name).cloned()
    }

    pub fn remove(&self, name: &str) {
        self.entries().remove(name);
    }

    pub fn snapshot(&self) -> HashMap<String, TeammateActivity> {
        self.entries().clone()
    }
}
