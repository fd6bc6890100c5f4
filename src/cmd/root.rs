//! Main daemon command - starts the orchestrator

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use arena_daemon::callback::CallbackClient;
use arena_daemon::codegen::GatewayClient;
use arena_daemon::config::Configuration;
use arena_daemon::engine::Engine;
use arena_daemon::gateway::GatewayRegistry;
use arena_daemon::ports::PortAllocator;
use arena_daemon::router::{self, AppState};
use arena_daemon::runtime::{ContainerRuntime, DockerRuntime};
use arena_daemon::store::StateStore;
use arena_daemon::workspace::WorkspaceManager;

/// Run the main daemon
pub async fn run() -> Result<()> {
    let config = Arc::new(Configuration::load()?);

    info!("Configuration loaded");
    info!("  API: {}:{}", config.api.host, config.api.port);
    info!("  Port range: {}-{}", config.ports.start, config.ports.end);
    info!("  Workspaces: {}", config.workspace.base.display());
    info!("  Isolation network: {}", config.docker.network);
    info!("  UI callback: {} (enabled: {})", config.callback.url, config.callback.enabled);

    // Container engine first: nothing works without it
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::new(&config.docker.socket)?);

    runtime.ensure_network(&config.docker.network).await?;

    // A previous daemon may have crashed with containers still up
    match runtime.reap_stale().await {
        Ok(0) => {}
        Ok(reaped) => info!("Reaped {} stale containers", reaped),
        Err(e) => warn!("Stale container sweep failed: {}", e),
    }

    // Process-wide singletons
    let store = Arc::new(StateStore::new());
    let registry = Arc::new(GatewayRegistry::new());
    let ports = Arc::new(PortAllocator::new(config.ports.start, config.ports.end));
    let workspaces = Arc::new(WorkspaceManager::new(
        config.workspace.base.clone(),
        config.workspace.template_dir.clone(),
    ));
    let generator = Arc::new(GatewayClient::new(&config.gateway)?);
    let callback = Arc::new(CallbackClient::new(&config.callback));

    let engine = Engine::new(
        store.clone(),
        registry.clone(),
        ports.clone(),
        workspaces,
        runtime.clone(),
        generator,
        callback,
        config.docker.clone(),
        config.health.clone(),
    );

    let state = AppState {
        engine: engine.clone(),
        store,
        registry,
        ports,
        runtime,
        config: config.clone(),
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;

    // Graceful shutdown: kill active containers in parallel, then drain HTTP
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let shutdown_engine = engine.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        warn!("Received shutdown signal, stopping runs");
        shutdown_engine.shutdown().await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    info!("Starting HTTP server on {}", bind_addr);
    axum_server::bind(bind_addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    info!("Daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
