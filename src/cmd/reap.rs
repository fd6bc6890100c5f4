//! Manual reaping of stale containers

use anyhow::Result;
use tracing::info;

use arena_daemon::config::Configuration;
use arena_daemon::runtime::{ContainerRuntime, DockerRuntime};

/// Remove leftover `build-*` / `run-*` containers from a crashed daemon
pub async fn run() -> Result<()> {
    let config = Configuration::load()?;
    let runtime = DockerRuntime::new(&config.docker.socket)?;

    let reaped = runtime.reap_stale().await?;
    info!("Reaped {} stale containers", reaped);

    Ok(())
}
