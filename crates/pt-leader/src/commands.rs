//! Leader command surface
//!
//! The slash-command parser and help text live in the external UI; this is
//! the typed surface it drives. Every command resolves to store mutations,
//! mailbox writes, or RPC calls on the runtime, and returns printable
//! result lines.

use crate::delegate::DelegatedTaskSpec;
use crate::runtime::{LeaderRuntime, WorkspaceMode};
use crate::spawn::worker_env;
use pi_teams_core::schema::TaskStatus;
use pi_teams_core::text::first_line_subject;
use pi_teams_core::{ClearMode, NewTask, TeamsError, WireMessage, sanitize};
use std::sync::Arc;

/// Commands the UI can issue against the leader runtime.
#[derive(Debug, Clone)]
pub enum LeaderCommand {
    Spawn {
        name: String,
        worktree: bool,
        plan_required: bool,
    },
    Send {
        to: String,
        text: String,
    },
    Broadcast {
        text: String,
    },
    Steer {
        to: String,
        text: String,
    },
    Stop {
        name: String,
    },
    Kill {
        name: String,
    },
    Shutdown {
        name: Option<String>,
    },
    PlanApprove {
        name: String,
    },
    PlanReject {
        name: String,
        feedback: String,
    },
    TaskAdd {
        text: String,
        owner: Option<String>,
    },
    TaskAssign {
        id: String,
        name: String,
    },
    TaskUnassign {
        id: String,
    },
    TaskList,
    TaskShow {
        id: String,
    },
    TaskClear {
        all: bool,
    },
    DepAdd {
        id: String,
        dep: String,
    },
    DepRm {
        id: String,
        dep: String,
    },
    DepLs {
        id: String,
    },
    TaskUse {
        task_list_id: String,
    },
    Delegate {
        tasks: Vec<DelegatedTaskSpec>,
    },
    DelegateMode {
        on: bool,
    },
    Cleanup,
    Env {
        name: String,
    },
    Id,
    List,
}

fn describe(task: &pi_teams_core::TeamTask) -> String {
    let status = match task.status {
        TaskStatus::Pending => "pending",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
    };
    let owner = task.owner.as_deref().unwrap_or("-");
    format!("#{} [{status}] {} (owner: {owner})", task.id, task.subject)
}

impl LeaderRuntime {
    /// Leader-side assignment of an existing task: set the owner (unless
    /// completed) and ping the assignee's task-list inbox.
    pub async fn assign_task(self: &Arc<Self>, id: &str, name: &str) -> anyhow::Result<()> {
        let name = sanitize(name);
        let tasks = self.task_store();
        let task_id = id.to_string();
        let owner = name.clone();
        let task = Self::blocking(move || {
            let Some(task) = tasks.get_task(&task_id)? else {
                return Err(TeamsError::NotFound(format!("task {task_id}")));
            };
            if task.status == TaskStatus::Completed {
                return Err(TeamsError::InvalidArgument(format!(
                    "task {task_id} is already completed"
                )));
            }
            tasks.update_task(&task_id, |t| t.owner = Some(owner.clone()))
        })
        .await?;

        let ping = WireMessage::TaskAssignment {
            task_id: task.id.clone(),
            subject: Some(task.subject.clone()),
            description: None,
            assigned_by: Some(self.lead_name().to_string()),
        };
        let mailbox = self.mailbox.clone();
        let ns = self.current_task_list();
        let payload =
            pi_teams_core::MailboxMessage::new(self.lead_name().to_string(), ping.encode());
        Self::blocking(move || mailbox.write(&ns, &name, payload)).await
    }

    /// Leader-side unassignment: return the task to the open pool.
    pub async fn unassign_task_by_lead(self: &Arc<Self>, id: &str) -> anyhow::Result<()> {
        let tasks = self.task_store();
        let task_id = id.to_string();
        Self::blocking(move || {
            let Some(task) = tasks.get_task(&task_id)? else {
                return Err(TeamsError::NotFound(format!("task {task_id}")));
            };
            if task.status == TaskStatus::Completed {
                return Err(TeamsError::InvalidArgument(format!(
                    "task {task_id} is already completed"
                )));
            }
            tasks
                .update_task(&task_id, |t| {
                    t.owner = None;
                    t.status = TaskStatus::Pending;
                })
                .map(|_| ())
        })
        .await
    }

    /// Execute one command, returning printable result lines.
    pub async fn handle_command(
        self: &Arc<Self>,
        command: LeaderCommand,
    ) -> anyhow::Result<Vec<String>> {
        match command {
            LeaderCommand::Spawn {
                name,
                worktree,
                plan_required,
            } => {
                let workspace = if worktree {
                    WorkspaceMode::Worktree
                } else {
                    WorkspaceMode::Shared
                };
                let outcome = self
                    .spawn_teammate(&name, None, workspace, plan_required)
                    .await?;
                let mut lines = vec![format!(
                    "spawned {} in {}",
                    outcome.name,
                    outcome.cwd.display()
                )];
                lines.extend(outcome.warnings);
                Ok(lines)
            }

            LeaderCommand::Send { to, text } => {
                self.send_dm(&to, &text).await?;
                Ok(vec![format!("sent to {to}")])
            }

            LeaderCommand::Broadcast { text } => {
                let sent = self.broadcast(&text).await?;
                Ok(vec![format!("broadcast to {sent} worker(s)")])
            }

            LeaderCommand::Steer { to, text } => {
                self.steer(&to, &text).await?;
                Ok(vec![format!("steered {to}")])
            }

            LeaderCommand::Stop { name } | LeaderCommand::Kill { name } => {
                self.kill_worker(&name).await?;
                Ok(vec![format!("stopped {name}")])
            }

            LeaderCommand::Shutdown { name: Some(name) } => {
                let request_id = self.shutdown_worker(&name).await?;
                Ok(vec![format!("asked {name} to shut down ({request_id})")])
            }

            LeaderCommand::Shutdown { name: None } => self.shutdown_all().await,

            LeaderCommand::PlanApprove { name } => {
                self.approve_plan(&name).await?;
                Ok(vec![format!("approved plan from {name}")])
            }

            LeaderCommand::PlanReject { name, feedback } => {
                self.reject_plan(&name, &feedback).await?;
                Ok(vec![format!("rejected plan from {name}")])
            }

            LeaderCommand::TaskAdd { text, owner } => {
                let tasks = self.task_store();
                let new_task = NewTask {
                    subject: first_line_subject(&text),
                    description: text,
                    owner: owner.map(|o| sanitize(&o)),
                };
                let task = Self::blocking(move || tasks.create_task(new_task)).await?;
                Ok(vec![format!("created {}", describe(&task))])
            }

            LeaderCommand::TaskAssign { id, name } => {
                self.assign_task(&id, &name).await?;
                Ok(vec![format!("assigned task #{id} to {name}")])
            }

            LeaderCommand::TaskUnassign { id } => {
                self.unassign_task_by_lead(&id).await?;
                Ok(vec![format!("unassigned task #{id}")])
            }

            LeaderCommand::TaskList => {
                let tasks = self.task_store();
                let tasks = Self::blocking(move || tasks.list_tasks()).await?;
                if tasks.is_empty() {
                    return Ok(vec!["no tasks".to_string()]);
                }
                Ok(tasks.iter().map(describe).collect())
            }

            LeaderCommand::TaskShow { id } => {
                let tasks = self.task_store();
                let task_id = id.clone();
                let task = Self::blocking(move || tasks.get_task(&task_id))
                    .await?
                    .ok_or_else(|| TeamsError::NotFound(format!("task {id}")))?;
                let mut lines = vec![describe(&task), task.description.clone()];
                if !task.blocked_by.is_empty() {
                    lines.push(format!("blocked by: {}", task.blocked_by.join(", ")));
                }
                if !task.blocks.is_empty() {
                    lines.push(format!("blocks: {}", task.blocks.join(", ")));
                }
                for (key, value) in &task.metadata {
                    lines.push(format!("{key}: {value}"));
                }
                Ok(lines)
            }

            LeaderCommand::TaskClear { all } => {
                let tasks = self.task_store();
                let mode = if all {
                    ClearMode::All
                } else {
                    ClearMode::Completed
                };
                let outcome = Self::blocking(move || tasks.clear_tasks(mode)).await?;
                let mut lines = vec![format!(
                    "cleared {} task(s), kept {}",
                    outcome.deleted.len(),
                    outcome.skipped.len()
                )];
                for (id, error) in outcome.errors {
                    lines.push(format!("task {id}: {error}"));
                }
                Ok(lines)
            }

            LeaderCommand::DepAdd { id, dep } => {
                let tasks = self.task_store();
                let (a, b) = (id.clone(), dep.clone());
                Self::blocking(move || tasks.add_task_dependency(&a, &b)).await?;
                Ok(vec![format!("task #{id} now blocked by #{dep}")])
            }

            LeaderCommand::DepRm { id, dep } => {
                let tasks = self.task_store();
                let (a, b) = (id.clone(), dep.clone());
                Self::blocking(move || tasks.remove_task_dependency(&a, &b)).await?;
                Ok(vec![format!("task #{id} no longer blocked by #{dep}")])
            }

            LeaderCommand::DepLs { id } => {
                let tasks = self.task_store();
                let task_id = id.clone();
                let task = Self::blocking(move || tasks.get_task(&task_id))
                    .await?
                    .ok_or_else(|| TeamsError::NotFound(format!("task {id}")))?;
                Ok(vec![
                    format!("blocked by: {}", task.blocked_by.join(", ")),
                    format!("blocks: {}", task.blocks.join(", ")),
                ])
            }

            LeaderCommand::TaskUse { task_list_id } => {
                self.use_task_list(&task_list_id);
                Ok(vec![format!("using task list {task_list_id}")])
            }

            LeaderCommand::Delegate { tasks } => {
                let outcome = self.delegate(tasks).await?;
                let mut lines: Vec<String> = outcome
                    .assignments
                    .iter()
                    .map(|a| format!("task #{} → {} ({})", a.task_id, a.assignee, a.subject))
                    .collect();
                lines.extend(outcome.warnings);
                Ok(lines)
            }

            LeaderCommand::DelegateMode { on } => {
                self.set_delegate_mode(on);
                Ok(vec![format!(
                    "delegate mode {}",
                    if on { "on" } else { "off" }
                )])
            }

            LeaderCommand::Cleanup => {
                self.cleanup().await?;
                Ok(vec![format!("removed team {}", self.team_id())])
            }

            LeaderCommand::Env { name } => {
                let name = sanitize(&name);
                Ok(worker_env(&self.cfg, &self.current_task_list(), &name, false)
                    .into_iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect())
            }

            LeaderCommand::Id => Ok(vec![format!(
                "team {} (task list {})",
                self.team_id(),
                self.current_task_list()
            )]),

            LeaderCommand::List => {
                let team = self.team.clone();
                let config = Self::blocking(move || team.load()).await?;
                let Some(config) = config else {
                    return Ok(vec!["no team config".to_string()]);
                };
                Ok(config
                    .members
                    .iter()
                    .map(|m| {
                        let role = match m.role {
                            pi_teams_core::MemberRole::Lead => "lead",
                            pi_teams_core::MemberRole::Worker => "worker",
                        };
                        let status = match m.status {
                            pi_teams_core::MemberStatus::Online => "online",
                            pi_teams_core::MemberStatus::Offline => "offline",
                        };
                        format!("{} [{role}, {status}]", m.name)
                    })
                    .collect())
            }
        }
    }
}
