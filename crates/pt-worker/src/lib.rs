//! Worker runtime for pi-teams
//!
//! A worker is a child process the leader spawns with the `PI_TEAMS_*`
//! environment. It polls its mailboxes for assignments and control
//! messages, runs tasks through a local agent backend, writes completions
//! back into the shared task files, and reports idleness to the lead.
//!
//! The agent itself is pluggable via [`agent::AgentDriver`]; the standalone
//! binary wires the built-in [`agent::EchoAgent`], while a full agent
//! runtime embeds this crate and supplies its own driver.

pub mod agent;
pub mod dedup;
pub mod env;
pub mod host;
pub mod prompt;
pub mod runtime;

pub use agent::{AgentDriver, AgentEvent, EchoAgent};
pub use env::WorkerEnv;
pub use host::run_stdio_host;
pub use runtime::{POLL_INTERVAL, WorkerRuntime, WorkerSnapshot};
