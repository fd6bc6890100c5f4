//! In-memory container runtime for tests
//!
//! Simulates build exits, health endpoints, and port bindings
//! deterministically. Health endpoints are real TCP listeners on ephemeral
//! ports answering any request with 200, so the engine's probe loop runs
//! unmodified.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::traits::{
    BuildSpec, ContainerHandle, ContainerRuntime, ContainerState, LogSink, RunSpec, RuntimeError,
    RuntimeResult, BUILD_PHASE_DELIMITER,
};

/// Scripted behavior of the build container
#[derive(Debug, Clone)]
pub enum BuildBehavior {
    /// Emit install output, the phase delimiter, build output, exit 0
    Succeed {
        install_log: String,
        build_log: String,
    },
    /// Emit output and exit non-zero
    Fail { exit_code: i64, log: String },
    /// Block until cancelled
    Hang,
}

/// Scripted behavior of the runtime container's health endpoint
#[derive(Debug, Clone, Copy)]
pub enum HealthBehavior {
    /// Serve 200 from a real ephemeral listener
    Serve,
    /// Bind nothing; probes hit a closed port
    Dead,
}

/// In-memory [`ContainerRuntime`]
pub struct FakeRuntime {
    pub build: Mutex<BuildBehavior>,
    pub health: Mutex<HealthBehavior>,
    created: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    networks: Mutex<Vec<String>>,
    runtime_logs: Mutex<HashMap<String, String>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            build: Mutex::new(BuildBehavior::Succeed {
                install_log: "added 1 package\n".into(),
                build_log: "compiled successfully\n".into(),
            }),
            health: Mutex::new(HealthBehavior::Serve),
            created: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            networks: Mutex::new(Vec::new()),
            runtime_logs: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn set_build(&self, behavior: BuildBehavior) {
        *self.build.lock() = behavior;
    }

    pub fn set_health(&self, behavior: HealthBehavior) {
        *self.health.lock() = behavior;
    }

    /// Names of containers created, in order
    pub fn created(&self) -> Vec<String> {
        self.created.lock().clone()
    }

    /// Names of containers stopped, in order
    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }

    /// Containers created and not yet stopped
    pub fn live(&self) -> Vec<String> {
        let stopped = self.stopped.lock();
        self.created
            .lock()
            .iter()
            .filter(|name| !stopped.contains(name))
            .cloned()
            .collect()
    }

    pub fn ensured_networks(&self) -> Vec<String> {
        self.networks.lock().clone()
    }

    /// Minimal HTTP server answering every request with 200
    async fn spawn_health_listener(&self) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let port = listener.local_addr().expect("local addr").port();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                        .await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        self.listeners.lock().push(handle);
        port
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FakeRuntime {
    fn drop(&mut self) {
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_network(&self, name: &str) -> RuntimeResult<()> {
        self.networks.lock().push(name.to_string());
        Ok(())
    }

    async fn build_exec(
        &self,
        spec: BuildSpec,
        sink: LogSink,
        cancel: CancellationToken,
    ) -> RuntimeResult<i64> {
        let behavior = self.build.lock().clone();
        self.created.lock().push(spec.container_name());

        let result = match behavior {
            BuildBehavior::Succeed {
                install_log,
                build_log,
            } => {
                sink(&install_log);
                sink(&format!("{}\n", BUILD_PHASE_DELIMITER));
                sink(&build_log);
                Ok(0)
            }
            BuildBehavior::Fail { exit_code, log } => {
                sink(&log);
                Ok(exit_code)
            }
            BuildBehavior::Hang => {
                cancel.cancelled().await;
                Err(RuntimeError::Cancelled)
            }
        };

        // One-shot container is removed on return
        self.stopped.lock().push(spec.container_name());
        result
    }

    async fn run_exec(
        &self,
        spec: RunSpec,
        cancel: CancellationToken,
    ) -> RuntimeResult<ContainerHandle> {
        if cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }

        let name = spec.container_name();
        self.created.lock().push(name.clone());
        self.runtime_logs
            .lock()
            .insert(name.clone(), format!("listening on port {}\n", spec.host_port));

        let health_behavior = *self.health.lock();
        let host_port = match health_behavior {
            HealthBehavior::Serve => self.spawn_health_listener().await,
            HealthBehavior::Dead => spec.host_port,
        };

        Ok(ContainerHandle {
            id: name,
            host_port,
            internal_ip: "172.28.0.2".to_string(),
        })
    }

    async fn inspect(&self, container: &str) -> RuntimeResult<ContainerState> {
        if !self.created.lock().iter().any(|name| name == container) {
            return Err(RuntimeError::ContainerNotFound(container.to_string()));
        }
        let running = !self.stopped.lock().iter().any(|name| name == container);
        Ok(ContainerState {
            running,
            exit_code: if running { None } else { Some(0) },
        })
    }

    async fn logs(&self, container: &str) -> RuntimeResult<String> {
        self.runtime_logs
            .lock()
            .get(container)
            .cloned()
            .ok_or_else(|| RuntimeError::ContainerNotFound(container.to_string()))
    }

    async fn stop(&self, container: &str, _grace: Duration) -> RuntimeResult<()> {
        let mut stopped = self.stopped.lock();
        if !stopped.iter().any(|name| name == container) {
            stopped.push(container.to_string());
        }
        Ok(())
    }

    async fn reap_stale(&self) -> RuntimeResult<usize> {
        Ok(0)
    }
}
