//! Notification seam between the leader core and its (external) UI.
//!
//! The interactive widget, panel, and key handling live outside this crate;
//! the core only pushes lines and refresh snapshots through this trait.

use pi_teams_core::{TeamConfig, TeamTask};
use tracing::info;

pub trait LeaderUi: Send + Sync {
    /// A one-line notice for the operator.
    fn notify(&self, line: &str);

    /// The widget's data changed: current tasks and team config.
    fn refresh(&self, tasks: &[TeamTask], config: Option<&TeamConfig>);
}

/// UI that drops everything; useful for headless flows and tests.
pub struct NoopUi;

impl LeaderUi for NoopUi {
    fn notify(&self, _line: &str) {}
    fn refresh(&self, _tasks: &[TeamTask], _config: Option<&TeamConfig>) {}
}

/// UI that logs notices through `tracing`; the CLI binary uses this.
pub struct TracingUi;

impl LeaderUi for TracingUi {
    fn notify(&self, line: &str) {
        info!("{line}");
    }

    fn refresh(&self, _tasks: &[TeamTask], _config: Option<&TeamConfig>) {}
}
