//! Task store: one JSON file per task, a locked monotonic id allocator,
//! and the claim/complete/unassign lifecycle operations
//!
//! Updates to a single task are serialized by its per-file lock, which makes
//! them linearizable across processes. There is no cross-task atomicity:
//! dependency edges are written as two independent locked updates, and a
//! reader that observes only one side must tolerate the transient asymmetry.

use crate::error::{Result, TeamsError};
use crate::io::json::{read_json, write_atomic_bytes, write_json_atomic};
use crate::io::lock::{LockOptions, with_lock};
use crate::paths::{TeamPaths, sanitize};
use crate::schema::{TaskStatus, TeamTask};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Name of the per-task-list id counter file.
const HIGHWATER_FILE: &str = ".highwatermark";

/// Input for [`TaskStore::create_task`].
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub subject: String,
    pub description: String,
    pub owner: Option<String>,
}

/// Which task files [`TaskStore::clear_tasks`] removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    /// Only tasks whose status is `completed`.
    Completed,
    /// Every task file in the list.
    All,
}

/// Report from a clear operation.
#[derive(Debug, Clone, Default)]
pub struct ClearOutcome {
    pub deleted: Vec<String>,
    pub skipped: Vec<String>,
    /// Per-file failures as `(id, message)` pairs.
    pub errors: Vec<(String, String)>,
}

/// Task store bound to one task-list directory inside a team.
#[derive(Debug, Clone)]
pub struct TaskStore {
    team_dir: PathBuf,
    dir: PathBuf,
    lock_opts: LockOptions,
}

impl TaskStore {
    pub fn new(paths: &TeamPaths, task_list_id: &str) -> Self {
        Self {
            team_dir: paths.team_dir().to_path_buf(),
            dir: paths.task_list_dir(task_list_id),
            lock_opts: LockOptions::with_label("tasks"),
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn task_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(id)))
    }

    fn task_lock_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json.lock", sanitize(id)))
    }

    /// Allocate the next task id under the highwater lock.
    ///
    /// The counter file is committed before the lock is released, so ids are
    /// strictly monotonic and gap-free even under concurrent creators.
    pub fn next_task_id(&self) -> Result<String> {
        let highwater = self.dir.join(HIGHWATER_FILE);
        let lock = self.dir.join(format!("{HIGHWATER_FILE}.lock"));

        with_lock(&lock, &self.lock_opts, || {
            let current: u64 = match fs::read_to_string(&highwater) {
                Ok(text) => text.trim().parse().unwrap_or(0),
                Err(_) => 0,
            };
            let next = current + 1;
            write_atomic_bytes(&highwater, format!("{next}\n").as_bytes())?;
            Ok(next.to_string())
        })
    }

    /// Allocate an id and write a new pending task.
    pub fn create_task(&self, new: NewTask) -> Result<TeamTask> {
        let id = self.next_task_id()?;
        let now = chrono::Utc::now().to_rfc3339();
        let task = TeamTask {
            id: id.clone(),
            subject: new.subject,
            description: new.description,
            owner: new.owner,
            status: TaskStatus::Pending,
            blocks: Vec::new(),
            blocked_by: Vec::new(),
            metadata: HashMap::new(),
            created_at: now.clone(),
            updated_at: now,
            unknown_fields: HashMap::new(),
        };
        write_json_atomic(&self.task_path(&id), &task)?;
        Ok(task)
    }

    /// Fetch a task by id; `None` when the file is missing or unparsable.
    pub fn get_task(&self, id: &str) -> Result<Option<TeamTask>> {
        match read_json::<TeamTask>(&self.task_path(id)) {
            Ok(task) => Ok(task),
            // A corrupt record is skipped, never surfaced as store corruption.
            Err(TeamsError::Json { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All tasks in the list, sorted by numeric id.
    pub fn list_tasks(&self) -> Result<Vec<TeamTask>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TeamsError::Io {
                    path: self.dir.clone(),
                    source: e,
                });
            }
        };

        let mut tasks = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_task_file = path.extension().is_some_and(|ext| ext == "json")
                && !path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if !is_task_file {
                continue;
            }
            // Parse failures on individual files drop only that record.
            if let Ok(Some(task)) = read_json::<TeamTask>(&path) {
                tasks.push(task);
            }
        }
        tasks.sort_by_key(|t| (t.numeric_id(), t.id.clone()));
        Ok(tasks)
    }

    /// Apply `f` to the current snapshot under the per-task lock, stamp
    /// `updatedAt`, and write back. Errors with `NotFound` when the task
    /// does not exist.
    pub fn update_task<F>(&self, id: &str, f: F) -> Result<TeamTask>
    where
        F: FnOnce(&mut TeamTask),
    {
        self.mutate_task(id, |task| {
            f(task);
            true
        })?
        .ok_or_else(|| TeamsError::NotFound(format!("task {id}")))
    }

    /// Conditional locked read-modify-write. `f` returns `false` to decline
    /// the mutation (preconditions not met), in which case nothing is
    /// written and `Ok(None)` is returned. A missing task is also `Ok(None)`.
    fn mutate_task<F>(&self, id: &str, f: F) -> Result<Option<TeamTask>>
    where
        F: FnOnce(&mut TeamTask) -> bool,
    {
        let path = self.task_path(id);
        let lock = self.task_lock_path(id);

        with_lock(&lock, &self.lock_opts, || {
            let Some(mut task) = read_json::<TeamTask>(&path)? else {
                return Ok(None);
            };
            if !f(&mut task) {
                return Ok(None);
            }
            task.updated_at = chrono::Utc::now().to_rfc3339();
            write_json_atomic(&path, &task)?;
            Ok(Some(task))
        })
    }

    /// True when `agent` currently owns an in-progress task in this list.
    fn agent_is_busy(&self, agent: &str) -> Result<bool> {
        Ok(self.list_tasks()?.iter().any(|t| {
            t.status == TaskStatus::InProgress && t.owner.as_deref() == Some(agent)
        }))
    }

    /// Claim a pending, unowned task for `agent`.
    ///
    /// Exactly one of several racing claimants succeeds; the others get
    /// `Ok(None)`. With `check_busy`, the claim is declined while the agent
    /// already has an in-progress task.
    pub fn claim_task(&self, id: &str, agent: &str, check_busy: bool) -> Result<Option<TeamTask>> {
        if check_busy && self.agent_is_busy(agent)? {
            return Ok(None);
        }
        let agent = agent.to_string();
        self.mutate_task(id, |task| {
            if task.status != TaskStatus::Pending || task.owner.is_some() {
                return false;
            }
            task.owner = Some(agent);
            task.status = TaskStatus::InProgress;
            true
        })
    }

    /// Move an already-assigned pending task to in-progress.
    pub fn start_assigned_task(&self, id: &str, agent: &str) -> Result<Option<TeamTask>> {
        if self.get_task(id)?.is_none() {
            return Err(TeamsError::NotFound(format!("task {id}")));
        }
        let agent = agent.to_string();
        self.mutate_task(id, |task| {
            if task.owner.as_deref() != Some(agent.as_str())
                || task.status != TaskStatus::Pending
            {
                return false;
            }
            task.status = TaskStatus::InProgress;
            true
        })
    }

    /// Complete a task owned by `agent`, recording `completedAt` and an
    /// optional result in metadata. A no-op (`Ok(None)`) unless the agent
    /// owns the task and it is not already completed.
    pub fn complete_task(
        &self,
        id: &str,
        agent: &str,
        result: Option<String>,
    ) -> Result<Option<TeamTask>> {
        if self.get_task(id)?.is_none() {
            return Err(TeamsError::NotFound(format!("task {id}")));
        }
        let agent = agent.to_string();
        self.mutate_task(id, |task| {
            if task.owner.as_deref() != Some(agent.as_str())
                || task.status == TaskStatus::Completed
            {
                return false;
            }
            task.status = TaskStatus::Completed;
            task.metadata.insert(
                "completedAt".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
            if let Some(result) = result.clone() {
                task.metadata
                    .insert("result".to_string(), serde_json::Value::String(result));
            }
            true
        })
    }

    /// Return a non-completed task owned by `agent` to the pending pool,
    /// clearing the owner and annotating metadata.
    pub fn unassign_task(
        &self,
        id: &str,
        agent: &str,
        reason: Option<&str>,
        extra: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Option<TeamTask>> {
        if self.get_task(id)?.is_none() {
            return Err(TeamsError::NotFound(format!("task {id}")));
        }
        let agent = agent.to_string();
        let reason = reason.map(|s| s.to_string());
        let extra = extra.cloned();
        self.mutate_task(id, |task| {
            if task.owner.as_deref() != Some(agent.as_str())
                || task.status == TaskStatus::Completed
            {
                return false;
            }
            task.owner = None;
            task.status = TaskStatus::Pending;
            task.metadata.insert(
                "unassignedAt".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
            if let Some(reason) = reason.clone() {
                task.metadata.insert(
                    "unassignReason".to_string(),
                    serde_json::Value::String(reason),
                );
            }
            if let Some(extra) = extra.clone() {
                task.metadata.extend(extra);
            }
            true
        })
    }

    /// Unassign every non-completed task currently owned by `agent`.
    /// Returns the number of tasks released. Idempotent: a second call
    /// finds nothing owned and changes nothing.
    pub fn unassign_tasks_for_agent(&self, agent: &str, reason: Option<&str>) -> Result<usize> {
        let mut released = 0;
        for task in self.list_tasks()? {
            if task.owner.as_deref() == Some(agent) && task.status != TaskStatus::Completed {
                if self.unassign_task(&task.id, agent, reason, None)?.is_some() {
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    /// True iff any dependency is missing or not completed.
    pub fn is_task_blocked(&self, task: &TeamTask) -> Result<bool> {
        for dep_id in &task.blocked_by {
            match self.get_task(dep_id)? {
                Some(dep) if dep.status == TaskStatus::Completed => {}
                _ => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Scan tasks in id order and claim the first that is pending, unowned,
    /// and unblocked. Returns `None` when nothing is claimable.
    pub fn claim_next_available_task(
        &self,
        agent: &str,
        check_busy: bool,
    ) -> Result<Option<TeamTask>> {
        for task in self.list_tasks()? {
            if task.status != TaskStatus::Pending || task.owner.is_some() {
                continue;
            }
            if self.is_task_blocked(&task)? {
                continue;
            }
            // The claim re-checks preconditions under the task lock, so a
            // racing winner just moves us on to the next candidate.
            if let Some(claimed) = self.claim_task(&task.id, agent, check_busy)? {
                return Ok(Some(claimed));
            }
        }
        Ok(None)
    }

    /// Add a mirrored dependency edge: `id` is blocked by `dep_id`.
    /// Both sides are idempotent; self-edges are rejected.
    pub fn add_task_dependency(&self, id: &str, dep_id: &str) -> Result<()> {
        if id == dep_id {
            return Err(TeamsError::InvalidArgument(format!(
                "task {id} cannot depend on itself"
            )));
        }
        if self.get_task(id)?.is_none() {
            return Err(TeamsError::NotFound(format!("task {id}")));
        }
        if self.get_task(dep_id)?.is_none() {
            return Err(TeamsError::NotFound(format!("task {dep_id}")));
        }

        let dep = dep_id.to_string();
        self.update_task(id, |task| {
            if !task.blocked_by.contains(&dep) {
                task.blocked_by.push(dep.clone());
            }
        })?;
        let blocked = id.to_string();
        self.update_task(dep_id, |task| {
            if !task.blocks.contains(&blocked) {
                task.blocks.push(blocked.clone());
            }
        })?;
        Ok(())
    }

    /// Remove a mirrored dependency edge. Missing tasks or absent edges are
    /// tolerated.
    pub fn remove_task_dependency(&self, id: &str, dep_id: &str) -> Result<()> {
        let dep = dep_id.to_string();
        self.mutate_task(id, |task| {
            let before = task.blocked_by.len();
            task.blocked_by.retain(|d| *d != dep);
            task.blocked_by.len() != before
        })?;
        let blocked = id.to_string();
        self.mutate_task(dep_id, |task| {
            let before = task.blocks.len();
            task.blocks.retain(|d| *d != blocked);
            task.blocks.len() != before
        })?;
        Ok(())
    }

    /// Delete matching task files. The resolved directory must sit inside
    /// the team directory; anything else is a hard `PathEscape` failure.
    pub fn clear_tasks(&self, mode: ClearMode) -> Result<ClearOutcome> {
        let mut outcome = ClearOutcome::default();

        let canonical_dir = match self.dir.canonicalize() {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(outcome),
            Err(e) => {
                return Err(TeamsError::Io {
                    path: self.dir.clone(),
                    source: e,
                });
            }
        };
        let canonical_team = self.team_dir.canonicalize().map_err(|e| TeamsError::Io {
            path: self.team_dir.clone(),
            source: e,
        })?;
        if !canonical_dir.starts_with(&canonical_team) {
            return Err(TeamsError::PathEscape {
                path: canonical_dir,
            });
        }

        let entries = fs::read_dir(&canonical_dir).map_err(|e| TeamsError::Io {
            path: canonical_dir.clone(),
            source: e,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") || name.starts_with('.') {
                continue;
            }
            let id = name.trim_end_matches(".json").to_string();

            let delete = match mode {
                ClearMode::All => true,
                ClearMode::Completed => match read_json::<TeamTask>(&path) {
                    Ok(Some(task)) => task.status == TaskStatus::Completed,
                    Ok(None) => false,
                    Err(_) => {
                        outcome
                            .errors
                            .push((id.clone(), "unparsable task file".to_string()));
                        false
                    }
                },
            };

            if delete {
                match fs::remove_file(&path) {
                    Ok(()) => outcome.deleted.push(id),
                    Err(e) => outcome.errors.push((id, e.to_string())),
                }
            } else if !outcome.errors.iter().any(|(eid, _)| *eid == id) {
                outcome.skipped.push(id);
            }
        }

        outcome.deleted.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
        outcome.skipped.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
        Ok(outcome)
    }
}
