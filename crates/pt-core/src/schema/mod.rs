//! Schema types for the filesystem coordination stores
//!
//! All schema types preserve unknown fields for forward compatibility and
//! use camelCase on the wire, so round-trip read-modify-write never loses
//! data written by newer versions.

pub mod message;
pub mod task;
pub mod team;

pub use message::MailboxMessage;
pub use task::{TaskStatus, TeamTask};
pub use team::{MemberRole, MemberStatus, TEAM_CONFIG_VERSION, TeamConfig, TeamMember};
