//! Leader runtime for pi-teams
//!
//! The leader owns the team lifecycle: it spawns worker processes, writes
//! task assignments into their mailboxes, consumes their idle
//! notifications, and drives interactive operations over a line-delimited
//! JSON RPC channel on each child's stdio. The mailbox flow alone is
//! sufficient for correctness; the RPC channel is strictly additive.

pub mod activity;
pub mod commands;
pub mod delegate;
pub mod dispatch;
pub mod rpc;
pub mod runtime;
pub mod spawn;
pub mod ui;

pub use activity::{ActivityTracker, TeammateActivity};
pub use commands::LeaderCommand;
pub use delegate::{Assignment, DelegateOutcome, DelegatedTaskSpec};
pub use rpc::{CALL_TIMEOUT, ChildRpc, ChildSpec, ChildState, RpcError, RpcResponse};
pub use runtime::{LeaderConfig, LeaderRuntime, PendingPlan, SpawnOutcome, WorkspaceMode};
pub use ui::{LeaderUi, NoopUi, TracingUi};
