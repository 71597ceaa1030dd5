use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use aurora_observability::{init_process_logging, ProcessKind};
use aurora_server::{serve, AppState};

#[derive(Parser, Debug)]
#[command(name = "engine")]
#[command(about = "Autonomous multi-agent software-engineering orchestration core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Starts the HTTP/WebSocket API surface (spec §6 External interfaces).
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8088)]
        port: u16,
        #[arg(long, env = "AURORA_STATE_DIR")]
        state_dir: Option<String>,
        #[arg(long, env = "AURORA_DAILY_BUDGET_CAP", default_value_t = 500.0)]
        daily_budget_cap: f64,
        #[arg(long, env = "AURORA_MONTHLY_BUDGET_CAP", default_value_t = 10_000.0)]
        monthly_budget_cap: f64,
    },
}

/// Exit codes distinguishing which subsystem failed at startup, so
/// supervisors can tell transient infrastructure trouble from a permanent
/// misconfiguration (spec §6: "non-zero indicates the specific subsystem
/// that failed at startup").
#[repr(i32)]
enum StartupFailure {
    Persistence = 10,
    Server = 11,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Command::Serve {
        hostname,
        port,
        state_dir,
        daily_budget_cap,
        monthly_budget_cap,
    } = cli.command;

    let state_dir = resolve_state_dir(state_dir);
    let logs_dir = aurora_observability::canonical_logs_dir_from_root(&state_dir);
    let (_guard, log_info) = init_process_logging(ProcessKind::Engine, &logs_dir, 14)
        .context("failed to initialize logging")?;
    info!(?log_info, "logging initialized");

    let addr: SocketAddr = format!("{hostname}:{port}")
        .parse()
        .context("invalid hostname or port")?;

    let state = match AppState::bootstrap(state_dir.join("workflows"), daily_budget_cap, monthly_budget_cap).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(target: "aurora.engine", %err, "failed to initialize durable store");
            std::process::exit(StartupFailure::Persistence as i32);
        }
    };

    info!("starting engine on http://{addr}");
    if let Err(err) = serve(addr, state).await {
        tracing::error!(target: "aurora.engine", %err, "server exited with error");
        std::process::exit(StartupFailure::Server as i32);
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("AURORA_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".aurora")
}
