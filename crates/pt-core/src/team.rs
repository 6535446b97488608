//! Team config store: a single locked `config.json` per team
//!
//! Readers return `None` on missing or invalid content; callers repair by
//! calling [`TeamStore::ensure`]. All mutations run under the one config
//! lock and bump `updatedAt`.

use crate::error::{Result, TeamsError};
use crate::io::json::{read_json, write_json_atomic};
use crate::io::lock::{LockOptions, with_lock};
use crate::paths::{TeamPaths, sanitize};
use crate::schema::{
    MemberRole, MemberStatus, TEAM_CONFIG_VERSION, TeamConfig, TeamMember,
};
use std::collections::HashMap;
use std::path::PathBuf;

/// Seed values for a new team config.
#[derive(Debug, Clone)]
pub struct TeamInit {
    pub team_id: String,
    pub task_list_id: String,
    pub lead_name: String,
    pub style: String,
    pub lead_cwd: Option<String>,
}

impl TeamInit {
    pub fn new(team_id: impl Into<String>, lead_name: impl Into<String>) -> Self {
        let team_id = team_id.into();
        Self {
            task_list_id: team_id.clone(),
            team_id,
            lead_name: lead_name.into(),
            style: "normal".to_string(),
            lead_cwd: None,
        }
    }
}

/// Store for one team's `config.json`.
#[derive(Debug, Clone)]
pub struct TeamStore {
    config_path: PathBuf,
    lock_path: PathBuf,
    lock_opts: LockOptions,
}

impl TeamStore {
    pub fn new(paths: &TeamPaths) -> Self {
        let config_path = paths.config_path();
        let lock_path = config_path.with_file_name("config.json.lock");
        Self {
            config_path,
            lock_path,
            lock_opts: LockOptions::with_label("team-config"),
        }
    }

    /// Read the config; `None` on missing or invalid content.
    pub fn load(&self) -> Result<Option<TeamConfig>> {
        match read_json::<TeamConfig>(&self.config_path) {
            Ok(config) => Ok(config),
            Err(TeamsError::Json { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create the config if missing or unreadable, seeding the lead member
    /// as online. An existing config is returned unchanged.
    pub fn ensure(&self, init: &TeamInit) -> Result<TeamConfig> {
        with_lock(&self.lock_path, &self.lock_opts, || {
            if let Some(existing) = self.load_unlocked()? {
                return Ok(existing);
            }

            let lead_name = sanitize(&init.lead_name);
            let now = chrono::Utc::now().to_rfc3339();
            let mut lead = TeamMember::new(lead_name.clone(), MemberRole::Lead);
            lead.cwd = init.lead_cwd.clone();

            let config = TeamConfig {
                version: TEAM_CONFIG_VERSION,
                team_id: init.team_id.clone(),
                task_list_id: init.task_list_id.clone(),
                lead_name,
                style: init.style.clone(),
                created_at: now.clone(),
                updated_at: now,
                members: vec![lead],
                unknown_fields: HashMap::new(),
            };
            write_json_atomic(&self.config_path, &config)?;
            Ok(config)
        })
    }

    fn load_unlocked(&self) -> Result<Option<TeamConfig>> {
        match read_json::<TeamConfig>(&self.config_path) {
            Ok(config) => Ok(config),
            Err(TeamsError::Json { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn mutate<F>(&self, f: F) -> Result<TeamConfig>
    where
        F: FnOnce(&mut TeamConfig) -> Result<()>,
    {
        with_lock(&self.lock_path, &self.lock_opts, || {
            let mut config = self.load_unlocked()?.ok_or_else(|| {
                TeamsError::NotFound(format!(
                    "team config at {}",
                    self.config_path.display()
                ))
            })?;
            f(&mut config)?;
            config.updated_at = chrono::Utc::now().to_rfc3339();
            write_json_atomic(&self.config_path, &config)?;
            Ok(config)
        })
    }

    /// Insert or update a member. An existing member keeps its `addedAt`;
    /// a new one is appended.
    pub fn upsert_member(&self, member: TeamMember) -> Result<TeamConfig> {
        self.mutate(|config| {
            match config.member_mut(&member.name) {
                Some(existing) => {
                    let added_at = existing.added_at.clone();
                    *existing = member.clone();
                    existing.added_at = added_at;
                }
                None => config.members.push(member.clone()),
            }
            Ok(())
        })
    }

    /// Update a member's presence. Status is mandatory: callers that only
    /// want to merge metadata still pass the member's current status.
    pub fn set_member_status(
        &self,
        name: &str,
        status: MemberStatus,
        last_seen_at: Option<String>,
        meta_merge: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<TeamConfig> {
        let name = name.to_string();
        self.mutate(|config| {
            let member = config
                .member_mut(&name)
                .ok_or_else(|| TeamsError::NotFound(format!("member {name}")))?;
            member.status = status;
            if let Some(seen) = last_seen_at.clone() {
                member.last_seen_at = Some(seen);
            }
            if let Some(meta) = meta_merge.clone() {
                member.meta.extend(meta);
            }
            Ok(())
        })
    }

    /// Update the team style.
    pub fn set_style(&self, style: &str) -> Result<TeamConfig> {
        let style = style.to_string();
        self.mutate(|config| {
            config.style = style.clone();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn team_store(temp: &TempDir) -> TeamStore {
        TeamStore::new(&TeamPaths::new(temp.path(), "T1"))
    }

    fn init() -> TeamInit {
        TeamInit::new("T1", "team-lead")
    }

    #[test]
    fn ensure_seeds_lead_online() {
        let temp = TempDir::new().unwrap();
        let store = team_store(&temp);

        let config = store.ensure(&init()).unwrap();
        assert_eq!(config.version, TEAM_CONFIG_VERSION);
        assert_eq!(config.lead_name, "team-lead");
        assert_eq!(config.members.len(), 1);
        assert_eq!(config.members[0].role, MemberRole::Lead);
        assert_eq!(config.members[0].status, MemberStatus::Online);
        assert_eq!(config.style, "normal");
    }

    #[test]
    fn ensure_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = team_store(&temp);

        let first = store.ensure(&init()).unwrap();
        let second = store.ensure(&init()).unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.members.len(), 1);
    }

    #[test]
    fn ensure_sanitizes_lead_name() {
        let temp = TempDir::new().unwrap();
        let store = team_store(&temp);
        let config = store
            .ensure(&TeamInit::new("T1", "lead with spaces"))
            .unwrap();
        assert_eq!(config.lead_name, "lead-with-spaces");
    }

    #[test]
    fn load_missing_or_invalid_is_none() {
        let temp = TempDir::new().unwrap();
        let store = team_store(&temp);
        assert!(store.load().unwrap().is_none());

        let config_path = TeamPaths::new(temp.path(), "T1").config_path();
        fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        fs::write(&config_path, "{corrupt").unwrap();
        assert!(store.load().unwrap().is_none());

        // Repair path: ensure recreates it.
        assert!(store.ensure(&init()).is_ok());
        assert!(store.load().unwrap().is_some());
    }

    #[test]
    fn upsert_preserves_added_at() {
        let temp = TempDir::new().unwrap();
        let store = team_store(&temp);
        store.ensure(&init()).unwrap();

        let mut member = TeamMember::new("agent1", MemberRole::Worker);
        member.added_at = "2026-07-30T10:00:00Z".to_string();
        store.upsert_member(member).unwrap();

        let mut update = TeamMember::new("agent1", MemberRole::Worker);
        update.status = MemberStatus::Offline;
        update.cwd = Some("/elsewhere".into());
        let config = store.upsert_member(update).unwrap();

        let agent = config.member("agent1").unwrap();
        assert_eq!(agent.added_at, "2026-07-30T10:00:00Z");
        assert_eq!(agent.status, MemberStatus::Offline);
        assert_eq!(agent.cwd.as_deref(), Some("/elsewhere"));
        assert_eq!(config.members.len(), 2);
    }

    #[test]
    fn set_member_status_merges_meta() {
        let temp = TempDir::new().unwrap();
        let store = team_store(&temp);
        store.ensure(&init()).unwrap();
        store
            .upsert_member(TeamMember::new("agent1", MemberRole::Worker))
            .unwrap();

        let mut meta = HashMap::new();
        meta.insert("shutdownApprovedRequestId".to_string(), "r1".into());
        let config = store
            .set_member_status(
                "agent1",
                MemberStatus::Offline,
                Some("2026-07-30T12:00:00Z".into()),
                Some(meta),
            )
            .unwrap();

        let agent = config.member("agent1").unwrap();
        assert_eq!(agent.status, MemberStatus::Offline);
        assert_eq!(agent.last_seen_at.as_deref(), Some("2026-07-30T12:00:00Z"));
        assert_eq!(agent.meta.get("shutdownApprovedRequestId").unwrap(), "r1");

        // A later merge keeps earlier keys.
        let mut more = HashMap::new();
        more.insert("offlineReason".to_string(), "crash".into());
        let config = store
            .set_member_status("agent1", MemberStatus::Offline, None, Some(more))
            .unwrap();
        let agent = config.member("agent1").unwrap();
        assert_eq!(agent.meta.len(), 2);
    }

    #[test]
    fn set_member_status_unknown_member() {
        let temp = TempDir::new().unwrap();
        let store = team_store(&temp);
        store.ensure(&init()).unwrap();
        let err = store
            .set_member_status("ghost", MemberStatus::Online, None, None)
            .unwrap_err();
        assert!(matches!(err, TeamsError::NotFound(_)));
    }

    #[test]
    fn set_style_bumps_updated_at() {
        let temp = TempDir::new().unwrap();
        let store = team_store(&temp);
        let before = store.ensure(&init()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let after = store.set_style("pirate").unwrap();
        assert_eq!(after.style, "pirate");
        assert!(after.updated_at >= before.updated_at);
    }
}
