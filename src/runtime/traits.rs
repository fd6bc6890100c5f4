//! Container runtime trait definitions

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Line emitted by the build container between dependency fetch and compile.
///
/// Install and compile share one container invocation; this marker is the
/// only thing that splits the combined stream into the two log buffers.
pub const BUILD_PHASE_DELIMITER: &str = "__ARENA_BUILD_PHASE__";

/// Port the generated application listens on inside its container
pub const CONTAINER_APP_PORT: u16 = 3000;

/// Error type for container runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Image pull failed: {0}")]
    ImagePull(String),

    #[error("Container start failed: {0}")]
    StartFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Callback receiving chunks of container output as they stream
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Resource caps applied to a container.
///
/// Fixed by the orchestrator, never negotiable by models.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    /// Memory limit in bytes
    pub memory: i64,

    /// CPU quota in microseconds per period
    pub cpu_quota: i64,

    /// CPU period in microseconds
    pub cpu_period: i64,

    /// PIDs limit
    pub pids_limit: i64,
}

impl ResourceLimits {
    /// Build phase: networked dependency fetch and compile
    pub fn build_phase() -> Self {
        Self {
            memory: 4 * 1024 * 1024 * 1024,
            cpu_quota: 200_000,
            cpu_period: 100_000,
            pids_limit: 512,
        }
    }

    /// Run phase: isolated execution of generated code
    pub fn run_phase() -> Self {
        Self {
            memory: 2 * 1024 * 1024 * 1024,
            cpu_quota: 100_000,
            cpu_period: 100_000,
            pids_limit: 512,
        }
    }
}

/// Specification for the one-shot build container
#[derive(Debug, Clone)]
pub struct BuildSpec {
    /// Run identifier; the container is named `build-<run_id>`
    pub run_id: String,

    /// Workspace directory, mounted read-write
    pub workspace: PathBuf,

    /// Container image
    pub image: String,

    /// Environment variables
    pub env: HashMap<String, String>,
}

impl BuildSpec {
    pub fn container_name(&self) -> String {
        format!("build-{}", self.run_id)
    }
}

/// Specification for the long-lived runtime container
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Run identifier; the container is named `run-<run_id>`
    pub run_id: String,

    /// Workspace directory, mounted read-only
    pub workspace: PathBuf,

    /// Container image
    pub image: String,

    /// Environment variables
    pub env: HashMap<String, String>,

    /// Isolation network the container is confined to
    pub network: String,

    /// Host port bound to [`CONTAINER_APP_PORT`]
    pub host_port: u16,
}

impl RunSpec {
    pub fn container_name(&self) -> String {
        format!("run-{}", self.run_id)
    }
}

/// Handle to a started runtime container
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    /// Engine-side container id
    pub id: String,

    /// Host port actually bound to the internal app port
    pub host_port: u16,

    /// Address on the isolation network
    pub internal_ip: String,
}

/// Observed container state
#[derive(Debug, Clone)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// Contract over the local container engine.
///
/// The single polymorphism boundary in the daemon: everything else talks to
/// containers through this trait, and tests substitute an in-memory fake.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ensure the isolation network exists with bridge internal isolation;
    /// idempotent.
    async fn ensure_network(&self, name: &str) -> RuntimeResult<()>;

    /// Run the one-shot build container to completion, streaming combined
    /// output through `sink`. The container is removed before returning.
    /// Returns the exit code.
    async fn build_exec(
        &self,
        spec: BuildSpec,
        sink: LogSink,
        cancel: CancellationToken,
    ) -> RuntimeResult<i64>;

    /// Start the long-lived runtime container on the isolation network with
    /// a host-port binding to the internal app port.
    async fn run_exec(
        &self,
        spec: RunSpec,
        cancel: CancellationToken,
    ) -> RuntimeResult<ContainerHandle>;

    /// Current state of a container
    async fn inspect(&self, container: &str) -> RuntimeResult<ContainerState>;

    /// Accumulated log buffer of a container
    async fn logs(&self, container: &str) -> RuntimeResult<String>;

    /// Stop, then kill, then remove a container; idempotent
    async fn stop(&self, container: &str, grace: Duration) -> RuntimeResult<()>;

    /// Remove leftover `build-*` / `run-*` containers from a previous
    /// daemon. Returns the number reaped.
    async fn reap_stale(&self) -> RuntimeResult<usize>;
}
