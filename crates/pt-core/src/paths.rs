//! Team directory layout and name sanitization
//!
//! Every team lives under a single root directory:
//!
//! ```text
//! <root>/<teamId>/
//!   config.json
//!   tasks/<taskListId>/
//!   mailboxes/<namespace>/inboxes/<agentName>.json
//!   sessions/<agentName>.jsonl
//!   worktrees/<agentName>/
//! ```
//!
//! The root is resolved once per call site from `PI_TEAMS_ROOT_DIR`, falling
//! back to `<home>/.pi/agent/teams`. Agent and namespace names always pass
//! through [`sanitize`] before becoming path components.

use crate::error::{Result, TeamsError};
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// Namespace used for team-level control messages (the lead's inbox lives here).
pub const TEAM_NAMESPACE: &str = "team";

/// Replace every character outside `[A-Za-z0-9_-]` with `-`, preserving case.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Resolve the teams root directory.
///
/// Precedence:
/// 1. `PI_TEAMS_ROOT_DIR` environment variable (if set and non-empty)
/// 2. `<home>/.pi/agent/teams`
pub fn teams_root() -> anyhow::Result<PathBuf> {
    if let Ok(root) = std::env::var("PI_TEAMS_ROOT_DIR") {
        let trimmed = root.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".pi").join("agent").join("teams"))
}

/// Deterministic mapping from a team id to the files and directories that
/// make up its coordination state.
#[derive(Debug, Clone)]
pub struct TeamPaths {
    root: PathBuf,
    team_dir: PathBuf,
}

impl TeamPaths {
    pub fn new(root: impl Into<PathBuf>, team_id: &str) -> Self {
        let root = root.into();
        let team_dir = root.join(sanitize(team_id));
        Self { root, team_dir }
    }

    /// The configured teams root this team lives under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn team_dir(&self) -> &Path {
        &self.team_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.team_dir.join("config.json")
    }

    pub fn task_list_dir(&self, task_list_id: &str) -> PathBuf {
        self.team_dir.join("tasks").join(sanitize(task_list_id))
    }

    pub fn inbox_path(&self, namespace: &str, recipient: &str) -> PathBuf {
        self.team_dir
            .join("mailboxes")
            .join(sanitize(namespace))
            .join("inboxes")
            .join(format!("{}.json", sanitize(recipient)))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.team_dir.join("sessions")
    }

    pub fn session_file(&self, agent: &str) -> PathBuf {
        self.sessions_dir().join(format!("{}.jsonl", sanitize(agent)))
    }

    pub fn worktree_dir(&self, agent: &str) -> PathBuf {
        self.team_dir.join("worktrees").join(sanitize(agent))
    }
}

/// Delete a team directory, refusing anything that escapes the teams root.
///
/// The target must resolve strictly inside `root`; deleting the root itself
/// is also refused. Removal is recursive and idempotent: a missing
/// directory is a success.
pub fn cleanup_team_dir(root: &Path, team_dir: &Path) -> Result<()> {
    if !team_dir.exists() {
        return Ok(());
    }
    let canonical_root = root.canonicalize().map_err(|e| TeamsError::Io {
        path: root.to_path_buf(),
        source: e,
    })?;
    let canonical_dir = team_dir.canonicalize().map_err(|e| TeamsError::Io {
        path: team_dir.to_path_buf(),
        source: e,
    })?;
    if canonical_dir == canonical_root || !canonical_dir.starts_with(&canonical_root) {
        return Err(TeamsError::PathEscape {
            path: canonical_dir,
        });
    }
    fs::remove_dir_all(&canonical_dir).map_err(|e| TeamsError::Io {
        path: canonical_dir.clone(),
        source: e,
    })
}
