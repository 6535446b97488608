//! Worker configuration from environment variables
//!
//! The leader sets the `PI_TEAMS_*` variables on every worker it spawns.
//! A process without the required ones is not a worker and treats the
//! whole runtime as a no-op.

use pi_teams_core::envvars::{
    DEFAULT_LEAD_NAME, ENV_AGENT_NAME, ENV_AUTO_CLAIM, ENV_LEAD_NAME, ENV_PLAN_REQUIRED,
    ENV_STYLE, ENV_TASK_LIST_ID, ENV_TEAM_ID, ENV_WORKER,
};
use pi_teams_core::{sanitize, teams_root};
use std::path::PathBuf;

/// Resolved worker configuration, read once at start.
#[derive(Debug, Clone)]
pub struct WorkerEnv {
    pub root: PathBuf,
    pub team_id: String,
    /// Sanitized agent name; also this worker's mailbox recipient name.
    pub agent_name: String,
    pub task_list_id: String,
    pub lead_name: String,
    pub auto_claim: bool,
    pub plan_required: bool,
    pub style: String,
}

fn non_empty(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl WorkerEnv {
    /// Read the worker environment. `Ok(None)` when this process is not
    /// configured as a worker (missing worker flag, team id, or agent name).
    pub fn from_env() -> anyhow::Result<Option<WorkerEnv>> {
        if non_empty(ENV_WORKER).as_deref() != Some("1") {
            return Ok(None);
        }
        let Some(team_id) = non_empty(ENV_TEAM_ID) else {
            return Ok(None);
        };
        let Some(agent_name) = non_empty(ENV_AGENT_NAME) else {
            return Ok(None);
        };

        let root = teams_root()?;
        let task_list_id = non_empty(ENV_TASK_LIST_ID).unwrap_or_else(|| team_id.clone());
        let lead_name =
            non_empty(ENV_LEAD_NAME).unwrap_or_else(|| DEFAULT_LEAD_NAME.to_string());
        let auto_claim = non_empty(ENV_AUTO_CLAIM).as_deref() != Some("0");
        let plan_required = non_empty(ENV_PLAN_REQUIRED).as_deref() == Some("1");
        let style = non_empty(ENV_STYLE).unwrap_or_else(|| "normal".to_string());

        Ok(Some(WorkerEnv {
            root,
            team_id,
            agent_name: sanitize(&agent_name),
            task_list_id,
            lead_name: sanitize(&lead_name),
            auto_claim,
            plan_required,
            style,
        }))
    }
}
