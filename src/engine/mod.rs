//! Run lifecycle engine
//!
//! Drives each run through its state machine: one tokio task per run, each a
//! strictly sequential sequence of transitions, with a per-run cancellation
//! token so an explicit kill can interrupt any in-progress phase. Failures
//! in one run never affect siblings.

mod health;
mod lifecycle;


use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callback::CallbackClient;
use crate::codegen::{CodeGenerator, ValidationError};
use crate::config::{DockerConfiguration, HealthConfiguration};
use crate::gateway::GatewayRegistry;
use crate::ports::{PortAllocator, PortError};
use crate::runtime::{ContainerRuntime, RuntimeError};
use crate::store::{Run, RunStatus, StateStore};
use crate::workspace::{WorkspaceError, WorkspaceManager};

/// Grace period for container stops on kill, failure, and shutdown
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Run-level errors; every one of these ends a run, none of them the daemon
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid generated code: {0}")]
    Validation(#[from] ValidationError),

    #[error("Code generation failed: {0}")]
    Generation(String),

    #[error("Build failed with exit code {exit_code}: {tail}")]
    Build { exit_code: i64, tail: String },

    #[error("Failed to start runtime container: {0}")]
    Start(String),

    #[error("{0}")]
    Health(String),

    #[error("{0}")]
    Workspace(#[from] WorkspaceError),

    #[error("{0}")]
    Ports(#[from] PortError),

    #[error("Container engine error: {0}")]
    Engine(#[from] RuntimeError),

    #[error("Run cancelled")]
    Cancelled,
}

/// Errors from an explicit kill
#[derive(Debug, Error)]
pub enum KillError {
    #[error("Run not found: {0}")]
    NotFound(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),
}

/// The run lifecycle engine
pub struct Engine {
    pub(crate) store: Arc<StateStore>,
    pub(crate) registry: Arc<GatewayRegistry>,
    pub(crate) ports: Arc<PortAllocator>,
    pub(crate) workspaces: Arc<WorkspaceManager>,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) generator: Arc<dyn CodeGenerator>,
    pub(crate) callback: Arc<CallbackClient>,
    pub(crate) docker: DockerConfiguration,
    pub(crate) health: HealthConfiguration,
    pub(crate) probe_client: reqwest::Client,
    active: DashMap<String, CancellationToken>,
    // Handed to spawned run tasks; never upgrades once the engine is gone
    self_ref: Weak<Engine>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StateStore>,
        registry: Arc<GatewayRegistry>,
        ports: Arc<PortAllocator>,
        workspaces: Arc<WorkspaceManager>,
        runtime: Arc<dyn ContainerRuntime>,
        generator: Arc<dyn CodeGenerator>,
        callback: Arc<CallbackClient>,
        docker: DockerConfiguration,
        health: HealthConfiguration,
    ) -> Arc<Self> {
        let probe_client = reqwest::Client::builder()
            .timeout(health.timeout)
            .build()
            .unwrap_or_default();

        Arc::new_cyclic(|self_ref| Self {
            store,
            registry,
            ports,
            workspaces,
            runtime,
            generator,
            callback,
            docker,
            health,
            probe_client,
            active: DashMap::new(),
            self_ref: self_ref.clone(),
        })
    }

    /// Spawn tasks for every startable run in a session
    pub fn start_session(&self, session_id: &str) -> Result<usize, KillError> {
        let session = self
            .store
            .session(session_id)
            .ok_or_else(|| KillError::NotFound(session_id.to_string()))?;

        let mut started = 0;
        for run_id in &session.run_ids {
            if self.start_run(run_id).unwrap_or(false) {
                started += 1;
            }
        }
        Ok(started)
    }

    /// Spawn a task for one run.
    ///
    /// A queued run starts fresh; a terminal run is reset for a retry; a run
    /// already in flight is left alone. Returns whether a task was spawned.
    pub fn start_run(&self, run_id: &str) -> Result<bool, KillError> {
        let run = self
            .store
            .run(run_id)
            .ok_or_else(|| KillError::NotFound(run_id.to_string()))?;

        if self.active.contains_key(run_id) {
            return Ok(false);
        }

        match run.status {
            RunStatus::Queued => {}
            status if status.is_terminal() => {
                self.store.reset_run(run_id);
            }
            _ => return Ok(false),
        }

        self.spawn(run_id);
        Ok(true)
    }

    fn spawn(&self, run_id: &str) {
        let Some(engine) = self.self_ref.upgrade() else {
            return;
        };
        let token = CancellationToken::new();

        use dashmap::mapref::entry::Entry;
        match self.active.entry(run_id.to_string()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(vacant) => {
                vacant.insert(token.clone());
            }
        }

        let run_id = run_id.to_string();
        tokio::spawn(async move {
            engine.drive(run_id, token).await;
        });
    }

    async fn drive(self: Arc<Self>, run_id: String, cancel: CancellationToken) {
        info!("Driving run {}", run_id);
        let result = lifecycle::execute(&self, &run_id, &cancel).await;
        self.active.remove(&run_id);

        match result {
            Ok(()) => info!("Run {} is ready", run_id),
            Err(RunError::Cancelled) => {
                // The kill path owns the terminal state; sweep anything the
                // interrupted phase may have left behind. Every cleanup step
                // is idempotent.
                debug!("Run {} cancelled", run_id);
                lifecycle::cleanup(&self, &run_id).await;
            }
            Err(e) => lifecycle::fail(&self, &run_id, e).await,
        }
    }

    /// Explicitly terminate a run from any non-terminal state.
    ///
    /// Idempotent: killing an already-terminal run is a no-op reported as
    /// success.
    pub async fn kill(&self, run_id: &str) -> Result<(), KillError> {
        let run = self
            .store
            .run(run_id)
            .ok_or_else(|| KillError::NotFound(run_id.to_string()))?;

        if run.status.is_terminal() {
            debug!("Kill of terminal run {} is a no-op", run_id);
            return Ok(());
        }

        info!("Killing run {}", run_id);
        if let Some((_, token)) = self.active.remove(run_id) {
            token.cancel();
        }

        let errors = lifecycle::cleanup_with_errors(self, run_id).await;

        if let Some(updated) = self
            .store
            .transition(run_id, RunStatus::Terminated, |r| {
                r.completed_at = Some(chrono::Utc::now());
            })
        {
            self.notify(updated);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KillError::Cleanup(errors.join("; ")))
        }
    }

    /// Kill every active container in parallel; called on SIGTERM
    pub async fn shutdown(&self) {
        info!("Shutting down engine, stopping active containers");

        for entry in self.active.iter() {
            entry.value().cancel();
        }
        self.active.clear();

        let containers = self.store.active_containers();
        let stops = containers.iter().map(|container| {
            let runtime = self.runtime.clone();
            async move {
                if let Err(e) = runtime.stop(container, STOP_GRACE).await {
                    warn!("Failed to stop {} during shutdown: {}", container, e);
                }
            }
        });
        join_all(stops).await;

        info!("Engine shutdown complete ({} containers)", containers.len());
    }

    /// Number of runs currently being driven
    pub fn active_run_count(&self) -> usize {
        self.active.len()
    }

    /// Issue a best-effort PATCH of the run's state to the UI
    pub(crate) fn notify(&self, run: Run) {
        let callback = self.callback.clone();
        tokio::spawn(async move {
            callback.patch_run(&run).await;
        });
    }
}
