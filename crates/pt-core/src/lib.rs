//! Core stores and schemas for pi-teams
//!
//! A team is a set of processes (one leader, many workers) coordinating
//! through a shared directory tree of plain JSON files: a team config, a
//! task list with dependency edges, and per-agent mailboxes. Processes
//! never connect to each other directly; every cross-process mutation runs
//! under an advisory file lock and every write is atomic
//! (temp-file-then-rename), so readers never observe partial state.
//!
//! All schema types preserve unknown fields for forward compatibility and
//! support round-trip serialization without data loss.

pub mod envvars;
pub mod error;
pub mod io;
pub mod logging;
pub mod mailbox;
pub mod paths;
pub mod protocol;
pub mod schema;
pub mod tasks;
pub mod team;
pub mod text;

pub use error::{Result, TeamsError};
pub use mailbox::Mailbox;
pub use paths::{TEAM_NAMESPACE, TeamPaths, cleanup_team_dir, sanitize, teams_root};
pub use protocol::{CompletedStatus, WireMessage};
pub use schema::{
    MailboxMessage, MemberRole, MemberStatus, TaskStatus, TeamConfig, TeamMember, TeamTask,
};
pub use tasks::{ClearMode, ClearOutcome, NewTask, TaskStore};
pub use team::{TeamInit, TeamStore};
