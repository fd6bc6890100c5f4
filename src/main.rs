//! Arena Daemon - Docker orchestration for the LLM benchmarking arena
//!
//! This daemon takes a set of runs (one per model), drives each through code
//! generation, sandboxed build, sandboxed execution and health probing, and
//! exposes the resulting web applications through a reverse-proxy registry.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cmd;

#[derive(Parser)]
#[command(name = "arena-daemon")]
#[command(about = "LLM arena run orchestrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("arena_daemon={}", log_level).into()),
        )
        .init();

    info!("Starting Arena Daemon v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd::Commands::Reap) => {
            cmd::reap::run().await?;
        }
        None => {
            if let Err(e) = cmd::root::run().await {
                error!("Daemon error: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
