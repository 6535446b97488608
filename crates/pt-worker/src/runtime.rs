//! Worker state machine
//!
//! Polls the worker's mailboxes every 350 ms, decides what to run next
//! (assigned tasks first, then queued DMs, then auto-claim), drives the
//! local agent, and writes completion state back into the task files.
//! Transient poll errors are swallowed so the loop stays alive; the first
//! unseen `shutdown_request` wins over everything else in a batch.

use crate::agent::{AgentDriver, AgentEvent};
use crate::dedup::SeenRequests;
use crate::env::WorkerEnv;
use crate::prompt::{DM_SEPARATOR, task_prompt};
use pi_teams_core::schema::{MemberRole, MemberStatus, TaskStatus, TeamMember};
use pi_teams_core::{
    CompletedStatus, Mailbox, MailboxMessage, TEAM_NAMESPACE, TaskStore, TeamInit, TeamPaths,
    TeamStore, TeamsError, WireMessage,
};
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poll period for the mailbox loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(350);

/// Abort metadata stashed by an `abort_request` (or a direct abort) and
/// consumed at the next agent turn end.
#[derive(Debug, Clone, Default)]
struct AbortState {
    reason: Option<String>,
    request_id: Option<String>,
}

#[derive(Default)]
struct WorkerState {
    streaming: bool,
    current_task_id: Option<String>,
    pending_assignments: VecDeque<String>,
    pending_dms: VecDeque<String>,
    shutdown_in_progress: bool,
    abort: Option<AbortState>,
    session_name: Option<String>,
    session_name_managed: bool,
    seen_shutdown: SeenRequests,
    seen_abort: SeenRequests,
}

/// Snapshot of the externally visible worker state (for `get_state` RPC).
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub streaming: bool,
    pub current_task_id: Option<String>,
    pub session_name: Option<String>,
}

/// Per-process worker runtime value.
pub struct WorkerRuntime {
    env: WorkerEnv,
    tasks: TaskStore,
    mailbox: Mailbox,
    team: TeamStore,
    agent: Arc<dyn AgentDriver>,
    state: Mutex<WorkerState>,
    deciding: AtomicBool,
    /// Stops the poll loop.
    cancel: CancellationToken,
    /// Signals the host that the worker wants the whole process to exit.
    shutdown: CancellationToken,
}

impl WorkerRuntime {
    pub fn new(env: WorkerEnv, agent: Arc<dyn AgentDriver>) -> Arc<Self> {
        let paths = TeamPaths::new(env.root.clone(), &env.team_id);
        let tasks = TaskStore::new(&paths, &env.task_list_id);
        let mailbox = Mailbox::new(paths.clone());
        let team = TeamStore::new(&paths);
        Arc::new(Self {
            env,
            tasks,
            mailbox,
            team,
            agent,
            state: Mutex::new(WorkerState::default()),
            deciding: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn env(&self) -> &WorkerEnv {
        &self.env
    }

    /// Token the host awaits to learn the worker wants to exit.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let st = self.state();
        WorkerSnapshot {
            streaming: st.streaming,
            current_task_id: st.current_task_id.clone(),
            session_name: st.session_name.clone(),
        }
    }

    async fn blocking<T, F>(f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> pi_teams_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::task::spawn_blocking(f).await {
            Ok(result) => result.map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::anyhow!("blocking store task failed: {e}")),
        }
    }

    /// Register in the team config, try to start work, and report idle.
    ///
    /// The caller starts the poll loop separately (usually right after).
    pub async fn session_start(self: &Arc<Self>) -> anyhow::Result<()> {
        let team = self.team.clone();
        let init = TeamInit {
            team_id: self.env.team_id.clone(),
            task_list_id: self.env.task_list_id.clone(),
            lead_name: self.env.lead_name.clone(),
            style: self.env.style.clone(),
            lead_cwd: None,
        };
        let mut member = TeamMember::new(self.env.agent_name.clone(), MemberRole::Worker);
        member.cwd = std::env::current_dir()
            .ok()
            .map(|p| p.display().to_string());
        Self::blocking(move || {
            team.ensure(&init)?;
            team.upsert_member(member)?;
            Ok(())
        })
        .await?;

        info!(
            "worker {} joined team {} (task list {})",
            self.env.agent_name, self.env.team_id, self.env.task_list_id
        );

        self.maybe_start_next_work().await?;
        if self.is_idle() {
            self.send_idle_notification(None, None).await?;
        }
        Ok(())
    }

    fn is_idle(&self) -> bool {
        let st = self.state();
        !st.streaming && st.current_task_id.is_none()
    }

    /// Run the 350 ms poll loop until shutdown.
    pub async fn run_poll_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(ControlFlow::Break(())) => break,
                        Ok(ControlFlow::Continue(())) => {}
                        // Transient: swallow and retry next tick.
                        Err(e) => warn!("mailbox poll failed: {e}"),
                    }
                }
            }
        }
    }

    /// One poll tick: pop both inboxes, handle each message in arrival
    /// order, then try to start more work.
    pub async fn poll_once(self: &Arc<Self>) -> anyhow::Result<ControlFlow<()>> {
        let agent = self.env.agent_name.clone();
        let team_mb = self.mailbox.clone();
        let team_agent = agent.clone();
        let team_pop = tokio::task::spawn_blocking(move || {
            team_mb.pop_unread(TEAM_NAMESPACE, &team_agent)
        });
        let list_mb = self.mailbox.clone();
        let list_ns = self.env.task_list_id.clone();
        let list_pop =
            tokio::task::spawn_blocking(move || list_mb.pop_unread(&list_ns, &agent));

        let (team_batch, list_batch) = tokio::join!(team_pop, list_pop);
        let mut messages = Vec::new();
        messages.extend(team_batch.map_err(|e| anyhow::anyhow!("poll task failed: {e}"))??);
        messages.extend(list_batch.map_err(|e| anyhow::anyhow!("poll task failed: {e}"))??);

        for msg in messages {
            if let ControlFlow::Break(()) = self.handle_mailbox_message(msg).await? {
                return Ok(ControlFlow::Break(()));
            }
        }

        self.maybe_start_next_work().await?;
        Ok(ControlFlow::Continue(()))
    }

    async fn handle_mailbox_message(
        self: &Arc<Self>,
        msg: MailboxMessage,
    ) -> anyhow::Result<ControlFlow<()>> {
        match WireMessage::parse(&msg.text) {
            Some(WireMessage::ShutdownRequest {
                request_id, reason, ..
            }) => {
                let duplicate = self.state().seen_shutdown.check_and_insert(&request_id);
                if duplicate {
                    debug!("ignoring duplicate shutdown_request {request_id}");
                    return Ok(ControlFlow::Continue(()));
                }
                self.approve_shutdown(&request_id, reason.as_deref()).await?;
                return Ok(ControlFlow::Break(()));
            }
            Some(WireMessage::SetSessionName { name }) => {
                self.apply_session_name(&name);
            }
            Some(WireMessage::AbortRequest {
                request_id,
                task_id,
                reason,
                ..
            }) => {
                let mut st = self.state();
                if st.seen_abort.check_and_insert(&request_id) {
                    debug!("ignoring duplicate abort_request {request_id}");
                    return Ok(ControlFlow::Continue(()));
                }
                let applies = task_id.is_none() || task_id == st.current_task_id;
                if applies {
                    st.abort = Some(AbortState {
                        reason,
                        request_id: Some(request_id),
                    });
                    drop(st);
                    self.agent.request_abort();
                }
            }
            Some(WireMessage::TaskAssignment { task_id, .. }) => {
                self.state().pending_assignments.push_back(task_id);
            }
            // Unknown structured messages and plain text are both DMs.
            Some(_) | None => {
                self.state().pending_dms.push_back(msg.text);
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Graceful shutdown handshake: ack, release tasks, go offline, exit.
    async fn approve_shutdown(
        self: &Arc<Self>,
        request_id: &str,
        reason: Option<&str>,
    ) -> anyhow::Result<()> {
        self.state().shutdown_in_progress = true;

        let ack = WireMessage::ShutdownApproved {
            from: self.env.agent_name.clone(),
            request_id: request_id.to_string(),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        };
        let mailbox = self.mailbox.clone();
        let lead = self.env.lead_name.clone();
        let from = self.env.agent_name.clone();
        Self::blocking(move || {
            mailbox.write(TEAM_NAMESPACE, &lead, MailboxMessage::new(from, ack.encode()))
        })
        .await?;

        self.release_and_go_offline(reason.unwrap_or("shutdown requested by lead"), None)
            .await;

        self.agent.request_abort();
        self.cancel.cancel();
        self.shutdown.cancel();
        info!("worker {} approved shutdown {request_id}", self.env.agent_name);
        Ok(())
    }

    /// Host-driven shutdown (SIGTERM, closed stdio): release tasks, mark
    /// offline, and post a final idle notification with the failure reason.
    /// Idempotent.
    pub async fn session_shutdown(self: &Arc<Self>, reason: &str) -> anyhow::Result<()> {
        {
            let mut st = self.state();
            if st.shutdown_in_progress {
                return Ok(());
            }
            st.shutdown_in_progress = true;
        }
        self.cancel.cancel();
        self.release_and_go_offline(reason, None).await;
        self.send_idle_notification(None, Some(reason.to_string()))
            .await?;
        self.shutdown.cancel();
        Ok(())
    }

    /// Unassign every non-completed owned task and mark the member offline.
    /// Best-effort: failures are logged, never fatal during teardown.
    async fn release_and_go_offline(
        self: &Arc<Self>,
        reason: &str,
        meta: Option<std::collections::HashMap<String, serde_json::Value>>,
    ) {
        let tasks = self.tasks.clone();
        let agent = self.env.agent_name.clone();
        let reason_owned = reason.to_string();
        if let Err(e) = Self::blocking(move || {
            tasks.unassign_tasks_for_agent(&agent, Some(&reason_owned))
        })
        .await
        {
            warn!("failed to unassign tasks during shutdown: {e}");
        }

        let team = self.team.clone();
        let agent = self.env.agent_name.clone();
        let result = Self::blocking(move || {
            team.set_member_status(
                &agent,
                MemberStatus::Offline,
                Some(chrono::Utc::now().to_rfc3339()),
                meta,
            )
        })
        .await;
        if let Err(e) = result {
            // A wiped config is not worth failing teardown over.
            if !matches!(
                e.downcast_ref::<TeamsError>(),
                Some(TeamsError::NotFound(_))
            ) {
                warn!("failed to mark member offline: {e}");
            }
        }
    }

    /// Apply a cosmetic session name when ours is empty or already managed.
    pub fn apply_session_name(&self, name: &str) {
        let mut st = self.state();
        if st.session_name.is_none() || st.session_name_managed {
            st.session_name = Some(name.to_string());
            st.session_name_managed = true;
            drop(st);
            self.agent.set_session_name(name);
        }
    }

    /// Deliver an interactive prompt straight to the agent (RPC fast path).
    pub fn send_direct_prompt(&self, text: String) -> anyhow::Result<()> {
        self.state().streaming = true;
        self.agent.send_prompt(text)
    }

    /// Direct abort from the leader's RPC channel (no request id).
    pub fn request_direct_abort(&self) {
        self.state().abort = Some(AbortState::default());
        self.agent.request_abort();
    }

    /// Decide what to run next. Single-flight; does nothing while streaming,
    /// while a task is current, or during shutdown.
    pub async fn maybe_start_next_work(self: &Arc<Self>) -> anyhow::Result<()> {
        if self
            .deciding
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let result = self.decide_next_work().await;
        self.deciding.store(false, Ordering::SeqCst);
        result
    }

    async fn decide_next_work(self: &Arc<Self>) -> anyhow::Result<()> {
        {
            let st = self.state();
            if st.streaming || st.current_task_id.is_some() || st.shutdown_in_progress {
                return Ok(());
            }
        }

        // 1. Assigned tasks, in delivery order. Blocked ones go back to the
        //    tail; unknown, foreign, or completed ids are dropped.
        let queued = self.state().pending_assignments.len();
        for _ in 0..queued {
            let Some(id) = self.state().pending_assignments.pop_front() else {
                break;
            };
            let tasks = self.tasks.clone();
            let fetch_id = id.clone();
            let Some(task) = Self::blocking(move || tasks.get_task(&fetch_id)).await? else {
                debug!("dropping assignment for unknown task {id}");
                continue;
            };
            if task.owner.as_deref() != Some(self.env.agent_name.as_str())
                || task.status == TaskStatus::Completed
            {
                debug!("dropping assignment for task {id} (not ours or already done)");
                continue;
            }

            let tasks = self.tasks.clone();
            let check = task.clone();
            if Self::blocking(move || tasks.is_task_blocked(&check)).await? {
                self.state().pending_assignments.push_back(id);
                continue;
            }

            let task = if task.status == TaskStatus::Pending {
                let tasks = self.tasks.clone();
                let start_id = task.id.clone();
                let agent = self.env.agent_name.clone();
                Self::blocking(move || tasks.start_assigned_task(&start_id, &agent))
                    .await?
                    .unwrap_or(task)
            } else {
                task
            };

            self.begin_task(&task)?;
            return Ok(());
        }

        // 2. Queued DMs, batched into a single user message.
        let dms: Vec<String> = {
            let mut st = self.state();
            st.pending_dms.drain(..).collect()
        };
        if !dms.is_empty() {
            self.state().streaming = true;
            if let Err(e) = self.agent.send_prompt(dms.join(DM_SEPARATOR)) {
                self.state().streaming = false;
                return Err(e);
            }
            return Ok(());
        }

        // 3. Auto-claim from the open pool.
        if self.env.auto_claim {
            let tasks = self.tasks.clone();
            let agent = self.env.agent_name.clone();
            if let Some(task) =
                Self::blocking(move || tasks.claim_next_available_task(&agent, true)).await?
            {
                self.begin_task(&task)?;
            }
        }
        Ok(())
    }

    fn begin_task(&self, task: &pi_teams_core::TeamTask) -> anyhow::Result<()> {
        {
            let mut st = self.state();
            st.current_task_id = Some(task.id.clone());
            // Optimistic: the Started event confirms it shortly.
            st.streaming = true;
        }
        info!("starting task #{} ({})", task.id, task.subject);
        if let Err(e) = self.agent.send_prompt(task_prompt(&self.env.agent_name, task)) {
            let mut st = self.state();
            st.current_task_id = None;
            st.streaming = false;
            return Err(e);
        }
        Ok(())
    }

    /// Feed one agent event into the state machine.
    pub async fn handle_agent_event(self: &Arc<Self>, event: AgentEvent) -> anyhow::Result<()> {
        match event {
            AgentEvent::Started => {
                self.state().streaming = true;
                Ok(())
            }
            AgentEvent::TextDelta(_) => Ok(()),
            AgentEvent::Ended { text } => self.on_agent_end(text).await,
        }
    }

    /// End of an agent turn: record the task outcome, look for more work,
    /// and report idle when nothing follows.
    async fn on_agent_end(self: &Arc<Self>, text: String) -> anyhow::Result<()> {
        let (task_id, abort) = {
            let mut st = self.state();
            st.streaming = false;
            (st.current_task_id.take(), st.abort.take())
        };

        let mut completion: Option<(String, CompletedStatus)> = None;
        if let Some(task_id) = task_id {
            let failed = abort.is_some() || text.trim().is_empty();
            if failed {
                self.record_task_failure(&task_id, abort, &text).await;
                completion = Some((task_id, CompletedStatus::Failed));
            } else {
                let tasks = self.tasks.clone();
                let agent = self.env.agent_name.clone();
                let complete_id = task_id.clone();
                let result_text = text.clone();
                match Self::blocking(move || {
                    tasks.complete_task(&complete_id, &agent, Some(result_text))
                })
                .await
                {
                    Ok(Some(_)) => {}
                    Ok(None) => warn!("task {task_id} was not completable (lost ownership?)"),
                    Err(e) => warn!("failed to complete task {task_id}: {e}"),
                }
                completion = Some((task_id, CompletedStatus::Completed));
            }
        }

        if self.state().shutdown_in_progress {
            return Ok(());
        }

        self.maybe_start_next_work().await?;
        if self.is_idle() {
            self.send_idle_notification(completion, None).await?;
        }
        Ok(())
    }

    /// Aborted or empty turn: keep the owner, return the task to pending,
    /// and annotate how it ended.
    async fn record_task_failure(
        self: &Arc<Self>,
        task_id: &str,
        abort: Option<AbortState>,
        partial_text: &str,
    ) {
        let agent = self.env.agent_name.clone();
        let abort = abort.unwrap_or_default();
        let mut metadata = std::collections::HashMap::new();
        metadata.insert(
            "abortedAt".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
        metadata.insert(
            "abortedBy".to_string(),
            serde_json::Value::String(agent.clone()),
        );
        metadata.insert(
            "abortReason".to_string(),
            serde_json::Value::String(
                abort
                    .reason
                    .unwrap_or_else(|| "agent produced no output".to_string()),
            ),
        );
        if let Some(request_id) = abort.request_id {
            metadata.insert(
                "abortRequestId".to_string(),
                serde_json::Value::String(request_id),
            );
        }
        if !partial_text.trim().is_empty() {
            metadata.insert(
                "partialResult".to_string(),
                serde_json::Value::String(partial_text.to_string()),
            );
        }

        let tasks = self.tasks.clone();
        let update_id = task_id.to_string();
        let result = Self::blocking(move || {
            tasks.update_task(&update_id, |task| {
                task.status = TaskStatus::Pending;
                task.metadata.extend(metadata);
            })
        })
        .await;
        if let Err(e) = result {
            warn!("failed to record abort for task {task_id}: {e}");
        }
    }

    async fn send_idle_notification(
        self: &Arc<Self>,
        completion: Option<(String, CompletedStatus)>,
        failure_reason: Option<String>,
    ) -> anyhow::Result<()> {
        let (completed_task_id, completed_status) = match completion {
            Some((id, status)) => (Some(id), Some(status)),
            None => (None, None),
        };
        let msg = WireMessage::IdleNotification {
            from: self.env.agent_name.clone(),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            completed_task_id,
            completed_status,
            failure_reason,
        };
        let mailbox = self.mailbox.clone();
        let lead = self.env.lead_name.clone();
        let from = self.env.agent_name.clone();
        Self::blocking(move || {
            mailbox.write(TEAM_NAMESPACE, &lead, MailboxMessage::new(from, msg.encode()))
        })
        .await
    }
}
