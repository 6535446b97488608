//! Spawn helpers: worker environment assembly and git worktree creation.

use crate::runtime::LeaderConfig;
use pi_teams_core::envvars::{
    ENV_AGENT_NAME, ENV_AUTO_CLAIM, ENV_LEAD_NAME, ENV_PLAN_REQUIRED, ENV_ROOT_DIR, ENV_STYLE,
    ENV_TASK_LIST_ID, ENV_TEAM_ID, ENV_WORKER,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ceiling for `git worktree add`; slow clones fall back to shared cwd.
const WORKTREE_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment overrides layered over the inherited environment for a
/// spawned worker.
pub(crate) fn worker_env(
    cfg: &LeaderConfig,
    task_list_id: &str,
    name: &str,
    plan_required: bool,
) -> Vec<(String, String)> {
    let mut env = vec![
        (ENV_WORKER.to_string(), "1".to_string()),
        (ENV_TEAM_ID.to_string(), cfg.team_id.clone()),
        (ENV_AGENT_NAME.to_string(), name.to_string()),
        (ENV_TASK_LIST_ID.to_string(), task_list_id.to_string()),
        (ENV_LEAD_NAME.to_string(), cfg.lead_name.clone()),
        (ENV_AUTO_CLAIM.to_string(), "1".to_string()),
        (ENV_STYLE.to_string(), cfg.style.clone()),
        (ENV_ROOT_DIR.to_string(), cfg.root.display().to_string()),
    ];
    if plan_required {
        env.push((ENV_PLAN_REQUIRED.to_string(), "1".to_string()));
    }
    env
}

/// Create a detached git worktree for a teammate. Any failure is returned
/// as a human-readable reason; the caller falls back to the shared cwd.
pub(crate) async fn create_worktree(repo_cwd: &Path, dir: &Path) -> Result<PathBuf, String> {
    if dir.exists() {
        return Ok(dir.to_path_buf());
    }
    if let Some(parent) = dir.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("creating worktrees dir: {e}"))?;
    }

    let mut cmd = tokio::process::Command::new("git");
    cmd.arg("-C")
        .arg(repo_cwd)
        .arg("worktree")
        .arg("add")
        .arg("--detach")
        .arg(dir);

    match tokio::time::timeout(WORKTREE_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => Ok(dir.to_path_buf()),
        Ok(Ok(output)) => Err(format!(
            "git worktree add failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )),
        Ok(Err(e)) => Err(format!("git worktree add failed: {e}")),
        Err(_) => Err(format!(
            "git worktree add timed out after {}s",
            WORKTREE_TIMEOUT.as_secs()
        )),
    }
}
