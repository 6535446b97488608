//! Leader runtime: teammate supervision, background timers, and shutdown
//!
//! All leader-global mutable state (current team, the teammates map, the
//! pending plan approvals, timer guards) lives in one runtime value that is
//! passed to handlers, never in globals. Background work is two single-
//! flight timers: a widget refresh and the lead inbox pump.

use crate::activity::ActivityTracker;
use crate::dispatch;
use crate::rpc::{ChildRpc, ChildSpec, ChildState};
use crate::spawn::{create_worktree, worker_env};
use crate::ui::LeaderUi;
use pi_teams_core::schema::{MemberRole, MemberStatus, TaskStatus, TeamMember};
use pi_teams_core::{
    Mailbox, MailboxMessage, TEAM_NAMESPACE, TaskStore, TeamInit, TeamPaths, TeamStore,
    TeamsError, WireMessage, cleanup_team_dir, sanitize,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long a gracefully asked RPC teammate gets before it is force-stopped.
const SHUTDOWN_FALLBACK: Duration = Duration::from_secs(10);

/// Leader configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    pub root: PathBuf,
    pub team_id: String,
    pub task_list_id: String,
    pub lead_name: String,
    pub style: String,
    /// Binary and argv prefix used for every spawned worker.
    pub worker_program: PathBuf,
    pub worker_args: Vec<String>,
    /// Upper bound on spawned teammates; clamped to `[1, 16]` at use.
    pub max_teammates: usize,
    pub refresh_interval: Duration,
    pub inbox_interval: Duration,
}

impl LeaderConfig {
    pub fn new(
        root: impl Into<PathBuf>,
        team_id: impl Into<String>,
        worker_program: impl Into<PathBuf>,
    ) -> Self {
        let team_id = team_id.into();
        Self {
            root: root.into(),
            task_list_id: team_id.clone(),
            team_id,
            lead_name: "team-lead".to_string(),
            style: "normal".to_string(),
            worker_program: worker_program.into(),
            worker_args: Vec::new(),
            max_teammates: 4,
            refresh_interval: Duration::from_millis(1000),
            inbox_interval: Duration::from_millis(700),
        }
    }

    pub(crate) fn clamped_max_teammates(&self) -> usize {
        self.max_teammates.clamp(1, 16)
    }
}

/// Where a spawned worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceMode {
    /// Share the leader's working directory.
    Shared,
    /// A git worktree under `<teamDir>/worktrees/<name>`; falls back to
    /// shared on any git failure.
    Worktree,
}

/// Result of spawning one teammate.
#[derive(Debug, Clone)]
pub struct SpawnOutcome {
    pub name: String,
    pub cwd: PathBuf,
    pub warnings: Vec<String>,
}

/// A plan awaiting the lead's decision.
#[derive(Debug, Clone)]
pub struct PendingPlan {
    pub request_id: String,
    pub from: String,
    pub plan: String,
    pub task_id: Option<String>,
}

/// Per-process leader runtime value.
pub struct LeaderRuntime {
    pub(crate) cfg: LeaderConfig,
    pub(crate) paths: TeamPaths,
    pub(crate) mailbox: Mailbox,
    pub(crate) team: TeamStore,
    task_list_id: Mutex<String>,
    pub(crate) teammates: Mutex<HashMap<String, Arc<ChildRpc>>>,
    pub(crate) activity: ActivityTracker,
    pub(crate) pending_plans: Mutex<HashMap<String, PendingPlan>>,
    pub(crate) delegate_mode: AtomicBool,
    refresh_busy: AtomicBool,
    inbox_busy: AtomicBool,
    pub(crate) ui: Arc<dyn LeaderUi>,
    cancel: CancellationToken,
}

fn guard<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl LeaderRuntime {
    pub fn new(cfg: LeaderConfig, ui: Arc<dyn LeaderUi>) -> Arc<Self> {
        let paths = TeamPaths::new(cfg.root.clone(), &cfg.team_id);
        let mailbox = Mailbox::new(paths.clone());
        let team = TeamStore::new(&paths);
        Arc::new(Self {
            task_list_id: Mutex::new(cfg.task_list_id.clone()),
            paths,
            mailbox,
            team,
            teammates: Mutex::new(HashMap::new()),
            activity: ActivityTracker::default(),
            pending_plans: Mutex::new(HashMap::new()),
            delegate_mode: AtomicBool::new(false),
            refresh_busy: AtomicBool::new(false),
            inbox_busy: AtomicBool::new(false),
            ui,
            cancel: CancellationToken::new(),
            cfg,
        })
    }

    pub(crate) async fn blocking<T, F>(f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> pi_teams_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::task::spawn_blocking(f).await {
            Ok(result) => result.map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::anyhow!("blocking store task failed: {e}")),
        }
    }

    /// Ensure the team config exists with this leader seeded online.
    pub async fn init(&self) -> anyhow::Result<()> {
        let team = self.team.clone();
        let init = TeamInit {
            team_id: self.cfg.team_id.clone(),
            task_list_id: self.current_task_list(),
            lead_name: self.cfg.lead_name.clone(),
            style: self.cfg.style.clone(),
            lead_cwd: std::env::current_dir()
                .ok()
                .map(|p| p.display().to_string()),
        };
        Self::blocking(move || team.ensure(&init).map(|_| ())).await
    }

    pub fn team_id(&self) -> &str {
        &self.cfg.team_id
    }

    pub fn lead_name(&self) -> &str {
        &self.cfg.lead_name
    }

    pub fn style(&self) -> &str {
        &self.cfg.style
    }

    pub fn current_task_list(&self) -> String {
        guard(&self.task_list_id).clone()
    }

    /// Switch the active task list namespace (`task use`).
    pub fn use_task_list(&self, task_list_id: &str) {
        *guard(&self.task_list_id) = task_list_id.to_string();
    }

    /// Task store bound to the currently active task list.
    pub fn task_store(&self) -> TaskStore {
        TaskStore::new(&self.paths, &self.current_task_list())
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the refresh and inbox timers. Both are single-flight: a slow
    /// iteration skips ticks instead of piling up.
    pub fn start_timers(self: &Arc<Self>) {
        let rt = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(rt.cfg.refresh_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = rt.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = rt.refresh_once().await {
                            warn!("widget refresh failed: {e}");
                        }
                    }
                }
            }
        });

        let rt = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(rt.cfg.inbox_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = rt.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = rt.inbox_once().await {
                            warn!("lead inbox pump failed: {e}");
                        }
                    }
                }
            }
        });
    }

    /// Reload the task list and team config and re-emit the widget.
    pub async fn refresh_once(self: &Arc<Self>) -> anyhow::Result<()> {
        if self
            .refresh_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let result = async {
            let tasks = self.task_store();
            let team = self.team.clone();
            let (tasks, config) =
                Self::blocking(move || Ok((tasks.list_tasks()?, team.load()?))).await?;
            self.ui.refresh(&tasks, config.as_ref());
            Ok(())
        }
        .await;
        self.refresh_busy.store(false, Ordering::SeqCst);
        result
    }

    /// Pop the lead's team-namespace inbox and dispatch every message.
    pub async fn inbox_once(self: &Arc<Self>) -> anyhow::Result<()> {
        if self
            .inbox_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let result = async {
            let mailbox = self.mailbox.clone();
            let lead = self.cfg.lead_name.clone();
            let messages =
                Self::blocking(move || mailbox.pop_unread(TEAM_NAMESPACE, &lead)).await?;
            for msg in messages {
                if let Err(e) = dispatch::dispatch_message(self, msg).await {
                    // One bad message never takes the leader down.
                    warn!("inbox dispatch failed: {e}");
                }
            }
            Ok(())
        }
        .await;
        self.inbox_busy.store(false, Ordering::SeqCst);
        result
    }

    /// Post a structured message to a worker's team-namespace inbox.
    pub(crate) async fn post_to_worker(
        &self,
        recipient: &str,
        message: &WireMessage,
    ) -> anyhow::Result<()> {
        let mailbox = self.mailbox.clone();
        let recipient = recipient.to_string();
        let payload = MailboxMessage::new(self.cfg.lead_name.clone(), message.encode());
        Self::blocking(move || mailbox.write(TEAM_NAMESPACE, &recipient, payload)).await
    }

    /// Send a plain DM to one member.
    pub async fn send_dm(&self, to: &str, text: &str) -> anyhow::Result<()> {
        let mailbox = self.mailbox.clone();
        let to = sanitize(to);
        let payload = MailboxMessage::new(self.cfg.lead_name.clone(), text.to_string());
        Self::blocking(move || mailbox.write(TEAM_NAMESPACE, &to, payload)).await
    }

    /// DM every online worker.
    pub async fn broadcast(&self, text: &str) -> anyhow::Result<usize> {
        let team = self.team.clone();
        let config = Self::blocking(move || team.load()).await?;
        let Some(config) = config else {
            return Ok(0);
        };
        let mut sent = 0;
        for member in &config.members {
            if member.role == MemberRole::Worker && member.status == MemberStatus::Online {
                self.send_dm(&member.name, text).await?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Steer a teammate: the RPC fast path when available, a mailbox DM
    /// otherwise.
    pub async fn steer(&self, name: &str, text: &str) -> anyhow::Result<()> {
        let name = sanitize(name);
        let rpc = guard(&self.teammates).get(&name).cloned();
        if let Some(rpc) = rpc {
            if rpc.steer(text).await.is_ok() {
                return Ok(());
            }
            warn!("rpc steer to {name} failed; falling back to mailbox");
        }
        self.send_dm(&name, text).await
    }

    /// Spawn and register a worker teammate.
    pub async fn spawn_teammate(
        self: &Arc<Self>,
        name: &str,
        mode: Option<String>,
        workspace: WorkspaceMode,
        plan_required: bool,
    ) -> anyhow::Result<SpawnOutcome> {
        let name = sanitize(name);
        if name.is_empty() {
            return Err(TeamsError::InvalidArgument("teammate name is empty".into()).into());
        }
        if guard(&self.teammates).contains_key(&name) {
            return Err(TeamsError::InvalidArgument(format!(
                "teammate {name} already exists"
            ))
            .into());
        }

        let mut warnings = Vec::new();

        // Per-teammate session file, owned by the agent runtime afterwards.
        let session_file = self.paths.session_file(&name);
        if let Some(parent) = session_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !session_file.exists() {
            std::fs::write(&session_file, b"")?;
        }

        let shared_cwd = std::env::current_dir()?;
        let cwd = match workspace {
            WorkspaceMode::Shared => shared_cwd,
            WorkspaceMode::Worktree => {
                match create_worktree(&shared_cwd, &self.paths.worktree_dir(&name)).await {
                    Ok(dir) => dir,
                    Err(reason) => {
                        warnings.push(format!(
                            "worktree for {name} unavailable ({reason}); using shared cwd"
                        ));
                        shared_cwd
                    }
                }
            }
        };

        let env = worker_env(
            &self.cfg,
            &self.current_task_list(),
            &name,
            plan_required,
        );
        let spec = ChildSpec {
            program: self.cfg.worker_program.clone(),
            args: self.cfg.worker_args.clone(),
            cwd: cwd.clone(),
            env,
        };
        let rpc = ChildRpc::start(&name, spec).await?;
        guard(&self.teammates).insert(name.clone(), Arc::clone(&rpc));

        // Activity subscription; unsubscribes when the child goes away.
        {
            let rt = Arc::clone(self);
            let rpc = Arc::clone(&rpc);
            let agent = name.clone();
            tokio::spawn(async move {
                let mut events = rpc.subscribe_events();
                loop {
                    tokio::select! {
                        _ = rpc.wait_stopped() => break,
                        event = events.recv() => match event {
                            Ok(event) => rt.activity.observe(&agent, &event),
                            // A lagged subscriber just misses some events.
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            });
        }

        // Session name over both channels: RPC for the fast path, mailbox
        // for workers that never speak RPC.
        let desired = dispatch::desired_session_name(&self.cfg.style, &name);
        if let Err(e) = rpc.set_session_name(&desired).await {
            warnings.push(format!("session name rpc to {name} failed: {e}"));
        }
        self.post_to_worker(&name, &WireMessage::SetSessionName { name: desired.clone() })
            .await?;

        let mut member = TeamMember::new(name.clone(), MemberRole::Worker);
        member.session_file = Some(session_file.display().to_string());
        member.cwd = Some(cwd.display().to_string());
        member
            .meta
            .insert("sessionName".into(), serde_json::Value::String(desired));
        if let Some(mode) = mode {
            member
                .meta
                .insert("mode".into(), serde_json::Value::String(mode));
        }
        if let Some(pid) = rpc.pid() {
            member
                .meta
                .insert("pid".into(), serde_json::Value::from(pid));
        }
        let team = self.team.clone();
        Self::blocking(move || team.upsert_member(member).map(|_| ())).await?;

        // Close monitor: release this worker's work when the child goes away.
        {
            let rt = Arc::clone(self);
            let rpc = Arc::clone(&rpc);
            let agent = name.clone();
            tokio::spawn(async move {
                rpc.wait_stopped().await;
                rt.on_teammate_closed(&agent).await;
            });
        }

        info!("spawned teammate {name}");
        Ok(SpawnOutcome {
            name,
            cwd,
            warnings,
        })
    }

    /// Cleanup shared by kill, close, and forced shutdown paths. Idempotent.
    pub(crate) async fn on_teammate_closed(&self, name: &str) {
        guard(&self.teammates).remove(name);
        self.activity.remove(name);

        let tasks = self.task_store();
        let agent = name.to_string();
        if let Err(e) = Self::blocking(move || {
            tasks.unassign_tasks_for_agent(&agent, Some("worker went offline"))
        })
        .await
        {
            warn!("failed to unassign tasks for {name}: {e}");
        }
        self.set_member_offline(name, None).await;
    }

    pub(crate) async fn set_member_offline(
        &self,
        name: &str,
        meta: Option<HashMap<String, serde_json::Value>>,
    ) {
        let team = self.team.clone();
        let name_owned = name.to_string();
        let result = Self::blocking(move || {
            team.set_member_status(
                &name_owned,
                MemberStatus::Offline,
                Some(chrono::Utc::now().to_rfc3339()),
                meta,
            )
            .map(|_| ())
        })
        .await;
        if let Err(e) = result {
            if !matches!(
                e.downcast_ref::<TeamsError>(),
                Some(TeamsError::NotFound(_))
            ) {
                warn!("failed to mark {name} offline: {e}");
            }
        }
    }

    /// Force-stop one RPC teammate and release its work (`kill <name>`).
    pub async fn kill_worker(&self, name: &str) -> anyhow::Result<()> {
        let name = sanitize(name);
        let rpc = guard(&self.teammates)
            .remove(&name)
            .ok_or_else(|| TeamsError::NotFound(format!("teammate {name}")))?;
        rpc.stop().await;
        self.on_teammate_closed(&name).await;
        info!("killed teammate {name}");
        Ok(())
    }

    /// Graceful shutdown request for one worker, with a forced fallback for
    /// RPC teammates that do not wind down within 10 s.
    pub async fn shutdown_worker(self: &Arc<Self>, name: &str) -> anyhow::Result<String> {
        let name = sanitize(name);
        let request_id = uuid::Uuid::new_v4().to_string();
        self.post_to_worker(
            &name,
            &WireMessage::ShutdownRequest {
                request_id: request_id.clone(),
                from: Some(self.cfg.lead_name.clone()),
                reason: None,
                timestamp: Some(chrono::Utc::now().to_rfc3339()),
            },
        )
        .await?;

        // Record the outstanding request on the member, preserving status.
        let team = self.team.clone();
        let meta_name = name.clone();
        let rid = request_id.clone();
        let _ = Self::blocking(move || {
            let Some(config) = team.load()? else {
                return Ok(());
            };
            let Some(member) = config.member(&meta_name) else {
                return Ok(());
            };
            let mut meta = HashMap::new();
            meta.insert(
                "shutdownRequestId".to_string(),
                serde_json::Value::String(rid),
            );
            team.set_member_status(&meta_name, member.status, None, Some(meta))
                .map(|_| ())
        })
        .await;

        if guard(&self.teammates).contains_key(&name) {
            let rt = Arc::clone(self);
            let fallback_name = name.clone();
            tokio::spawn(async move {
                tokio::time::sleep(SHUTDOWN_FALLBACK).await;
                let rpc = guard(&rt.teammates).get(&fallback_name).cloned();
                if let Some(rpc) = rpc {
                    if rpc.state() != ChildState::Stopped {
                        warn!(
                            "teammate {fallback_name} ignored shutdown request; force-stopping"
                        );
                        rpc.stop().await;
                    }
                    rt.on_teammate_closed(&fallback_name).await;
                }
            });
        }
        Ok(request_id)
    }

    /// Shut the whole team down; the leader's own session stays alive.
    ///
    /// RPC teammates are stopped directly. Remaining online manual workers
    /// without an in-progress task get a mailbox `shutdown_request` and are
    /// marked offline.
    pub async fn shutdown_all(self: &Arc<Self>) -> anyhow::Result<Vec<String>> {
        let mut notes = Vec::new();

        let rpc_teammates: Vec<(String, Arc<ChildRpc>)> =
            guard(&self.teammates).drain().collect();
        for (name, rpc) in rpc_teammates {
            rpc.stop().await;
            self.on_teammate_closed(&name).await;
            notes.push(format!("stopped {name}"));
        }

        let team = self.team.clone();
        let Some(config) = Self::blocking(move || team.load()).await? else {
            return Ok(notes);
        };
        let tasks = self.task_store();
        let in_progress: Vec<String> = Self::blocking(move || {
            Ok(tasks
                .list_tasks()?
                .into_iter()
                .filter(|t| t.status == TaskStatus::InProgress)
                .filter_map(|t| t.owner)
                .collect())
        })
        .await?;

        for member in &config.members {
            if member.role != MemberRole::Worker || member.status != MemberStatus::Online {
                continue;
            }
            if in_progress.iter().any(|owner| *owner == member.name) {
                notes.push(format!("{} has work in progress; left online", member.name));
                continue;
            }
            let request_id = uuid::Uuid::new_v4().to_string();
            self.post_to_worker(
                &member.name,
                &WireMessage::ShutdownRequest {
                    request_id,
                    from: Some(self.cfg.lead_name.clone()),
                    reason: None,
                    timestamp: Some(chrono::Utc::now().to_rfc3339()),
                },
            )
            .await?;
            self.set_member_offline(&member.name, None).await;
            notes.push(format!("asked {} to shut down", member.name));
        }
        Ok(notes)
    }

    /// Approve a teammate's pending plan.
    pub async fn approve_plan(&self, name: &str) -> anyhow::Result<()> {
        let name = sanitize(name);
        let plan = guard(&self.pending_plans)
            .remove(&name)
            .ok_or_else(|| TeamsError::NotFound(format!("no pending plan from {name}")))?;
        self.post_to_worker(
            &name,
            &WireMessage::PlanApproved {
                request_id: plan.request_id,
                from: self.cfg.lead_name.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        )
        .await
    }

    /// Reject a teammate's pending plan with feedback.
    pub async fn reject_plan(&self, name: &str, feedback: &str) -> anyhow::Result<()> {
        let name = sanitize(name);
        let plan = guard(&self.pending_plans)
            .remove(&name)
            .ok_or_else(|| TeamsError::NotFound(format!("no pending plan from {name}")))?;
        self.post_to_worker(
            &name,
            &WireMessage::PlanRejected {
                request_id: plan.request_id,
                from: self.cfg.lead_name.clone(),
                feedback: feedback.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        )
        .await
    }

    pub fn pending_plan(&self, name: &str) -> Option<PendingPlan> {
        guard(&self.pending_plans).get(name).cloned()
    }

    pub fn set_delegate_mode(&self, on: bool) {
        self.delegate_mode.store(on, Ordering::SeqCst);
    }

    pub fn delegate_mode(&self) -> bool {
        self.delegate_mode.load(Ordering::SeqCst)
    }

    /// Teammate names currently driven over RPC.
    pub fn teammate_names(&self) -> Vec<String> {
        let mut names: Vec<String> = guard(&self.teammates).keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn teammate(&self, name: &str) -> Option<Arc<ChildRpc>> {
        guard(&self.teammates).get(name).cloned()
    }

    /// Stop everything and delete the team directory. Refuses targets
    /// outside the configured root.
    pub async fn cleanup(self: &Arc<Self>) -> anyhow::Result<()> {
        let rpc_teammates: Vec<(String, Arc<ChildRpc>)> =
            guard(&self.teammates).drain().collect();
        for (name, rpc) in rpc_teammates {
            rpc.stop().await;
            self.activity.remove(&name);
        }
        self.cancel.cancel();

        let root = self.cfg.root.clone();
        let team_dir = self.paths.team_dir().to_path_buf();
        Self::blocking(move || cleanup_team_dir(&root, &team_dir)).await
    }
}
