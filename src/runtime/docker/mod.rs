//! Docker implementation of the container runtime contract

mod build;
mod run;

use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{ListContainersOptions, LogsOptions, RemoveContainerOptions, StopContainerOptions};
use bollard::image::CreateImageOptions;
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::{
    BuildSpec, ContainerHandle, ContainerRuntime, ContainerState, LogSink, RunSpec, RuntimeError,
    RuntimeResult,
};

/// Container runtime backed by a local Docker engine
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the engine at the given socket path
    pub fn new(socket: &str) -> RuntimeResult<Self> {
        let client = Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self { client })
    }

    pub(crate) fn docker(&self) -> &Docker {
        &self.client
    }

    /// Ensure the image exists locally, pulling if necessary
    pub(crate) async fn ensure_image(
        &self,
        image: &str,
        cancel: &CancellationToken,
    ) -> RuntimeResult<()> {
        match self.client.inspect_image(image).await {
            Ok(_) => {
                debug!("Image {} already present", image);
                return Ok(());
            }
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                info!("Image {} not found, pulling", image);
            }
            Err(e) => return Err(RuntimeError::Docker(e)),
        }

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
                item = stream.next() => match item {
                    Some(Ok(progress)) => {
                        if let Some(status) = progress.status {
                            debug!("Pull {}: {}", image, status);
                        }
                    }
                    Some(Err(e)) => return Err(RuntimeError::ImagePull(e.to_string())),
                    None => break,
                }
            }
        }

        info!("Pulled image {}", image);
        Ok(())
    }

    /// Force-remove a container, tolerating absence
    pub(crate) async fn remove_container(&self, name: &str) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.client.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(())
            }
            Err(e) => Err(RuntimeError::Docker(e)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_network(&self, name: &str) -> RuntimeResult<()> {
        match self.client.inspect_network::<String>(name, None).await {
            Ok(_) => {
                debug!("Isolation network {} already exists", name);
                return Ok(());
            }
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {}
            Err(e) => return Err(RuntimeError::Docker(e)),
        }

        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            // No default egress: runtime containers must not reach out
            internal: true,
            ..Default::default()
        };

        match self.client.create_network(options).await {
            Ok(_) => {
                info!("Created isolation network {}", name);
                Ok(())
            }
            // Lost a creation race with a concurrent daemon start
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 409, .. }) => {
                Ok(())
            }
            Err(e) => Err(RuntimeError::Docker(e)),
        }
    }

    async fn build_exec(
        &self,
        spec: BuildSpec,
        sink: LogSink,
        cancel: CancellationToken,
    ) -> RuntimeResult<i64> {
        build::build_exec(self, spec, sink, cancel).await
    }

    async fn run_exec(
        &self,
        spec: RunSpec,
        cancel: CancellationToken,
    ) -> RuntimeResult<ContainerHandle> {
        run::run_exec(self, spec, cancel).await
    }

    async fn inspect(&self, container: &str) -> RuntimeResult<ContainerState> {
        let info = self
            .client
            .inspect_container(container, None)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                    RuntimeError::ContainerNotFound(container.to_string())
                }
                e => RuntimeError::Docker(e),
            })?;

        let state = info.state.unwrap_or_default();
        Ok(ContainerState {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    async fn logs(&self, container: &str) -> RuntimeResult<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut stream = self.client.logs(container, Some(options));
        let mut result = String::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(output) => result.push_str(&output.to_string()),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => return Err(RuntimeError::ContainerNotFound(container.to_string())),
                Err(e) => {
                    warn!("Error reading logs for {}: {}", container, e);
                    break;
                }
            }
        }

        Ok(result)
    }

    async fn stop(&self, container: &str, grace: Duration) -> RuntimeResult<()> {
        // Docker's stop escalates to SIGKILL after the grace period on its
        // own; removal below catches anything that survived.
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.client.stop_container(container, Some(options)).await {
            Ok(())
            | Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404 | 304,
                ..
            }) => {}
            Err(e) => {
                warn!("Stop failed for {}: {}", container, e);
            }
        }

        self.remove_container(container).await?;
        debug!("Stopped and removed container {}", container);
        Ok(())
    }

    async fn reap_stale(&self) -> RuntimeResult<usize> {
        let mut filters = std::collections::HashMap::new();
        filters.insert("name".to_string(), vec!["build-".to_string(), "run-".to_string()]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;
        let mut reaped = 0;

        for container in containers {
            let names = container.names.unwrap_or_default();
            let Some(name) = names
                .iter()
                .map(|n| n.trim_start_matches('/'))
                .find(|n| n.starts_with("build-") || n.starts_with("run-"))
            else {
                continue;
            };

            info!("Reaping stale container {}", name);
            let name = name.to_string();
            if let Err(e) = self.remove_container(&name).await {
                warn!("Failed to reap {}: {}", name, e);
            } else {
                reaped += 1;
            }
        }

        Ok(reaped)
    }
}
