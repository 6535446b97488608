//! pi-teams worker binary
//!
//! Reads the `PI_TEAMS_*` environment, joins the team, and serves the RPC
//! channel on stdio until the leader hangs up or a shutdown request lands.
//! Without the worker environment this binary is a no-op.

use pi_teams_worker::{EchoAgent, WorkerEnv, WorkerRuntime, run_stdio_host};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pi_teams_core::logging::init();

    let Some(env) = WorkerEnv::from_env()? else {
        info!("pi-teams worker environment not set; nothing to do");
        return Ok(());
    };

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let agent = Arc::new(EchoAgent::new(events_tx));
    let runtime = WorkerRuntime::new(env, agent);

    runtime.session_start().await?;
    let poll = tokio::spawn(Arc::clone(&runtime).run_poll_loop());

    #[cfg(unix)]
    {
        let rt = Arc::clone(&runtime);
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                let _ = rt.session_shutdown("terminated by signal").await;
            }
        });
    }

    run_stdio_host(Arc::clone(&runtime), events_rx).await?;

    // Covers the leader vanishing without a handshake; a no-op after a
    // graceful shutdown.
    runtime.session_shutdown("rpc channel closed").await?;
    let _ = poll.await;
    Ok(())
}
