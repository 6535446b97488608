//! Environment variable names shared by the leader (which sets them on
//! spawned workers) and the worker (which reads them at start).

/// Marks a process as a pi-teams worker; value `"1"`.
pub const ENV_WORKER: &str = "PI_TEAMS_WORKER";
pub const ENV_TEAM_ID: &str = "PI_TEAMS_TEAM_ID";
pub const ENV_AGENT_NAME: &str = "PI_TEAMS_AGENT_NAME";
/// Optional; defaults to the team id.
pub const ENV_TASK_LIST_ID: &str = "PI_TEAMS_TASK_LIST_ID";
/// Optional; defaults to `team-lead`.
pub const ENV_LEAD_NAME: &str = "PI_TEAMS_LEAD_NAME";
/// `"1"` or `"0"`; defaults to `"1"`.
pub const ENV_AUTO_CLAIM: &str = "PI_TEAMS_AUTO_CLAIM";
pub const ENV_PLAN_REQUIRED: &str = "PI_TEAMS_PLAN_REQUIRED";
pub const ENV_STYLE: &str = "PI_TEAMS_STYLE";
/// Overrides the teams root directory.
pub const ENV_ROOT_DIR: &str = "PI_TEAMS_ROOT_DIR";
/// Log level for all pi-teams binaries.
pub const ENV_LOG: &str = "PI_TEAMS_LOG";

/// Default lead member name when `PI_TEAMS_LEAD_NAME` is unset.
pub const DEFAULT_LEAD_NAME: &str = "team-lead";
