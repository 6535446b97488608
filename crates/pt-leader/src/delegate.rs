//! Task delegation: fan a batch of task texts out across the team.

use crate::runtime::{LeaderRuntime, WorkspaceMode};
use pi_teams_core::schema::MemberRole;
use pi_teams_core::text::first_line_subject;
use pi_teams_core::{MailboxMessage, NewTask, WireMessage, sanitize};
use std::sync::Arc;
use tracing::warn;

/// One task to delegate: free-form text plus an optional explicit assignee.
#[derive(Debug, Clone)]
pub struct DelegatedTaskSpec {
    pub text: String,
    pub assignee: Option<String>,
}

/// One line of the per-task assignment summary.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub task_id: String,
    pub assignee: String,
    pub subject: String,
}

#[derive(Debug, Clone, Default)]
pub struct DelegateOutcome {
    pub assignments: Vec<Assignment>,
    pub warnings: Vec<String>,
}

impl LeaderRuntime {
    /// Current worker pool in stable (config) order.
    async fn worker_pool(self: &Arc<Self>) -> anyhow::Result<Vec<String>> {
        let team = self.team.clone();
        let config = Self::blocking(move || team.load()).await?;
        Ok(config
            .map(|c| {
                c.members
                    .iter()
                    .filter(|m| m.role == MemberRole::Worker)
                    .map(|m| m.name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Make sure a worker by this name exists, spawning when possible.
    /// Returns a warning instead of failing: the task assignment is still
    /// valid for a manual worker that joins later.
    async fn ensure_worker(
        self: &Arc<Self>,
        name: &str,
        pool: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> anyhow::Result<()> {
        if pool.iter().any(|n| n == name) {
            return Ok(());
        }
        let max = self.cfg.clamped_max_teammates();
        if pool.len() >= max {
            warnings.push(format!(
                "{name} not spawned (team at capacity {max}); assigning anyway"
            ));
            pool.push(name.to_string());
            return Ok(());
        }
        match self
            .spawn_teammate(name, None, WorkspaceMode::Shared, false)
            .await
        {
            Ok(outcome) => {
                warnings.extend(outcome.warnings);
            }
            Err(e) => {
                warn!("could not spawn {name}: {e}");
                warnings.push(format!("could not spawn {name}: {e}; assigning anyway"));
            }
        }
        pool.push(name.to_string());
        Ok(())
    }

    /// Delegate a batch of tasks: ensure the needed workers, create a task
    /// file per entry, and ping the assignee's task-list inbox.
    ///
    /// Unassigned entries round-robin over the worker pool in stable order,
    /// spawning up to `max_teammates` default-named workers when the pool
    /// is empty.
    pub async fn delegate(
        self: &Arc<Self>,
        specs: Vec<DelegatedTaskSpec>,
    ) -> anyhow::Result<DelegateOutcome> {
        let mut outcome = DelegateOutcome::default();
        if specs.is_empty() {
            return Ok(outcome);
        }

        let mut pool = self.worker_pool().await?;

        // Named assignees first.
        for spec in &specs {
            if let Some(assignee) = &spec.assignee {
                let name = sanitize(assignee);
                self.ensure_worker(&name, &mut pool, &mut outcome.warnings)
                    .await?;
            }
        }

        // An empty pool grows default-named workers for the round-robin.
        if pool.is_empty() {
            let unassigned = specs.iter().filter(|s| s.assignee.is_none()).count();
            let wanted = unassigned.min(self.cfg.clamped_max_teammates()).max(1);
            for i in 1..=wanted {
                self.ensure_worker(&format!("worker-{i}"), &mut pool, &mut outcome.warnings)
                    .await?;
            }
        }

        let task_list_id = self.current_task_list();
        let mut next = 0usize;
        for spec in specs {
            let assignee = match &spec.assignee {
                Some(name) => sanitize(name),
                None => {
                    let name = pool[next % pool.len()].clone();
                    next += 1;
                    name
                }
            };

            let tasks = self.task_store();
            let subject = first_line_subject(&spec.text);
            let new_task = NewTask {
                subject: subject.clone(),
                description: spec.text.clone(),
                owner: Some(assignee.clone()),
            };
            let task = Self::blocking(move || tasks.create_task(new_task)).await?;

            let ping = WireMessage::TaskAssignment {
                task_id: task.id.clone(),
                subject: Some(subject.clone()),
                description: None,
                assigned_by: Some(self.cfg.lead_name.clone()),
            };
            let mailbox = self.mailbox.clone();
            let ns = task_list_id.clone();
            let recipient = assignee.clone();
            let payload = MailboxMessage::new(self.cfg.lead_name.clone(), ping.encode());
            Self::blocking(move || mailbox.write(&ns, &recipient, payload)).await?;

            outcome.assignments.push(Assignment {
                task_id: task.id,
                assignee,
                subject,
            });
        }
        Ok(outcome)
    }
}
