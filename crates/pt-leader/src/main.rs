//! pi-teams leader CLI
//!
//! Thin command-line surface over the leader runtime: one-shot team and
//! task operations, plus `run`, a long-running mode that spawns workers,
//! delegates tasks, and pumps the inbox until interrupted.

use clap::{Parser, Subcommand};
use pi_teams_core::envvars::ENV_TEAM_ID;
use pi_teams_core::teams_root;
use pi_teams_leader::{
    DelegatedTaskSpec, LeaderCommand, LeaderConfig, LeaderRuntime, TracingUi,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "pi-teams-leader", version, about = "Coordinate a team of worker agents")]
struct Cli {
    /// Team id; falls back to PI_TEAMS_TEAM_ID.
    #[arg(long)]
    team: Option<String>,

    /// Teams root directory; falls back to PI_TEAMS_ROOT_DIR.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Worker binary; defaults to pi-teams-worker next to this executable.
    #[arg(long)]
    worker_bin: Option<PathBuf>,

    #[arg(long, default_value = "team-lead")]
    lead_name: String,

    #[arg(long, default_value = "normal")]
    style: String,

    #[arg(long, default_value_t = 4)]
    max_teammates: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the team config.
    Init,
    /// Spawn one worker teammate.
    Spawn {
        name: String,
        #[arg(long)]
        worktree: bool,
        #[arg(long)]
        plan_required: bool,
    },
    /// Create and assign one task per TEXT argument.
    Delegate {
        #[arg(required = true)]
        tasks: Vec<String>,
        /// Assign every task to this worker instead of round-robin.
        #[arg(long)]
        assignee: Option<String>,
    },
    /// DM one member.
    Send { to: String, text: String },
    /// DM every online worker.
    Broadcast { text: String },
    /// Steer a running teammate.
    Steer { to: String, text: String },
    #[command(subcommand)]
    Task(TaskCommand),
    #[command(subcommand)]
    Dep(DepCommand),
    /// Graceful shutdown of one worker, or the whole team without a name.
    Shutdown { name: Option<String> },
    /// Force-stop one RPC teammate.
    Kill { name: String },
    /// Delete the entire team directory.
    Cleanup,
    /// Show the team and task-list ids.
    Id,
    /// List team members.
    List,
    /// Show the environment a spawned worker would receive.
    Env { name: String },
    /// Spawn workers, delegate tasks, and run the leader loops until
    /// interrupted.
    Run {
        #[arg(long, default_value_t = 2)]
        workers: usize,
        #[arg(long = "task")]
        tasks: Vec<String>,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    Add {
        text: String,
        #[arg(long)]
        owner: Option<String>,
    },
    List,
    Show { id: String },
    Assign { id: String, name: String },
    Unassign { id: String },
    Clear {
        #[arg(long)]
        all: bool,
    },
    Use { task_list_id: String },
}

#[derive(Subcommand)]
enum DepCommand {
    Add { id: String, dep: String },
    Rm { id: String, dep: String },
    Ls { id: String },
}

fn resolve_worker_bin(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("cannot locate executable directory"))?;
    Ok(dir.join("pi-teams-worker"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pi_teams_core::logging::init();
    let cli = Cli::parse();

    let team_id = match cli.team.or_else(|| std::env::var(ENV_TEAM_ID).ok()) {
        Some(team) if !team.trim().is_empty() => team,
        _ => anyhow::bail!("no team id: pass --team or set {ENV_TEAM_ID}"),
    };
    let root = match cli.root {
        Some(root) => root,
        None => teams_root()?,
    };
    let worker_bin = resolve_worker_bin(cli.worker_bin)?;

    let mut cfg = LeaderConfig::new(root, team_id, worker_bin);
    cfg.lead_name = cli.lead_name;
    cfg.style = cli.style;
    cfg.max_teammates = cli.max_teammates;

    let runtime = LeaderRuntime::new(cfg, Arc::new(TracingUi));
    runtime.init().await?;

    let command = match cli.command {
        Command::Init => {
            info!("team {} ready", runtime.team_id());
            return Ok(());
        }
        Command::Run { workers, tasks } => {
            return run_loop(&runtime, workers, tasks).await;
        }
        Command::Spawn {
            name,
            worktree,
            plan_required,
        } => LeaderCommand::Spawn {
            name,
            worktree,
            plan_required,
        },
        Command::Delegate { tasks, assignee } => LeaderCommand::Delegate {
            tasks: tasks
                .into_iter()
                .map(|text| DelegatedTaskSpec {
                    text,
                    assignee: assignee.clone(),
                })
                .collect(),
        },
        Command::Send { to, text } => LeaderCommand::Send { to, text },
        Command::Broadcast { text } => LeaderCommand::Broadcast { text },
        Command::Steer { to, text } => LeaderCommand::Steer { to, text },
        Command::Task(task) => match task {
            TaskCommand::Add { text, owner } => LeaderCommand::TaskAdd { text, owner },
            TaskCommand::List => LeaderCommand::TaskList,
            TaskCommand::Show { id } => LeaderCommand::TaskShow { id },
            TaskCommand::Assign { id, name } => LeaderCommand::TaskAssign { id, name },
            TaskCommand::Unassign { id } => LeaderCommand::TaskUnassign { id },
            TaskCommand::Clear { all } => LeaderCommand::TaskClear { all },
            TaskCommand::Use { task_list_id } => LeaderCommand::TaskUse { task_list_id },
        },
        Command::Dep(dep) => match dep {
            DepCommand::Add { id, dep } => LeaderCommand::DepAdd { id, dep },
            DepCommand::Rm { id, dep } => LeaderCommand::DepRm { id, dep },
            DepCommand::Ls { id } => LeaderCommand::DepLs { id },
        },
        Command::Shutdown { name } => LeaderCommand::Shutdown { name },
        Command::Kill { name } => LeaderCommand::Kill { name },
        Command::Cleanup => LeaderCommand::Cleanup,
        Command::Id => LeaderCommand::Id,
        Command::List => LeaderCommand::List,
        Command::Env { name } => LeaderCommand::Env { name },
    };

    for line in runtime.handle_command(command).await? {
        println!("{line}");
    }
    Ok(())
}

async fn run_loop(
    runtime: &Arc<LeaderRuntime>,
    workers: usize,
    tasks: Vec<String>,
) -> anyhow::Result<()> {
    runtime.start_timers();

    for i in 1..=workers.max(1) {
        let name = format!("worker-{i}");
        match runtime
            .spawn_teammate(&name, None, pi_teams_leader::WorkspaceMode::Shared, false)
            .await
        {
            Ok(outcome) => {
                for warning in outcome.warnings {
                    info!("{warning}");
                }
            }
            Err(e) => info!("spawn {name} failed: {e}"),
        }
    }

    if !tasks.is_empty() {
        let outcome = runtime
            .delegate(
                tasks
                    .into_iter()
                    .map(|text| DelegatedTaskSpec {
                        text,
                        assignee: None,
                    })
                    .collect(),
            )
            .await?;
        for assignment in outcome.assignments {
            info!(
                "task #{} → {} ({})",
                assignment.task_id, assignment.assignee, assignment.subject
            );
        }
        for warning in outcome.warnings {
            info!("{warning}");
        }
    }

    info!("leader running; press Ctrl-C to shut the team down");
    tokio::signal::ctrl_c().await?;

    for line in runtime.shutdown_all().await? {
        info!("{line}");
    }
    Ok(())
}
