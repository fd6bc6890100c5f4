//! One-shot build container execution
//!
//! A single networked container performs dependency fetch then compile; the
//! two phases share a working tree and must be atomic, so the split is only
//! a delimiter echoed between the commands.

use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    WaitContainerOptions,
};
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::DockerRuntime;
use crate::runtime::traits::{
    BuildSpec, LogSink, ResourceLimits, RuntimeError, RuntimeResult, BUILD_PHASE_DELIMITER,
};

/// Run the build container to completion, streaming output into `sink`
pub(super) async fn build_exec(
    runtime: &DockerRuntime,
    spec: BuildSpec,
    sink: LogSink,
    cancel: CancellationToken,
) -> RuntimeResult<i64> {
    let container_name = spec.container_name();
    let limits = ResourceLimits::build_phase();

    runtime.ensure_image(&spec.image, &cancel).await?;

    // Clear any leftover container from a crashed previous attempt
    runtime.remove_container(&container_name).await?;

    let env_vars: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let command = format!(
        "npm install 2>&1 && echo {} && npm run build 2>&1",
        BUILD_PHASE_DELIMITER
    );

    let host_config = HostConfig {
        mounts: Some(vec![Mount {
            target: Some("/workspace".to_string()),
            source: Some(spec.workspace.to_string_lossy().to_string()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(false),
            ..Default::default()
        }]),
        memory: Some(limits.memory),
        cpu_quota: Some(limits.cpu_quota),
        cpu_period: Some(limits.cpu_period),
        pids_limit: Some(limits.pids_limit),
        // Dependency fetch needs the registry, so the build stays on the
        // default bridge
        network_mode: Some("bridge".to_string()),
        ..Default::default()
    };

    let config = Config {
        image: Some(spec.image.clone()),
        cmd: Some(vec!["sh".to_string(), "-lc".to_string(), command]),
        env: Some(env_vars),
        working_dir: Some("/workspace".to_string()),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(host_config),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: container_name.as_str(),
        platform: None,
    };
    runtime.docker().create_container(Some(options), config).await?;
    debug!("Created build container {}", container_name);

    // Attach before starting so no early output is lost
    let attach_options = AttachContainerOptions::<String> {
        stdout: Some(true),
        stderr: Some(true),
        stream: Some(true),
        ..Default::default()
    };
    let AttachContainerResults { mut output, .. } = runtime
        .docker()
        .attach_container(&container_name, Some(attach_options))
        .await?;

    runtime
        .docker()
        .start_container::<String>(&container_name, None)
        .await?;
    info!("Started build container {}", container_name);

    let stream_sink = sink.clone();
    let output_handle = tokio::spawn(async move {
        while let Some(item) = output.next().await {
            match item {
                Ok(log) => {
                    let chunk = log.to_string();
                    if !chunk.is_empty() {
                        stream_sink(&chunk);
                    }
                }
                Err(e) => {
                    warn!("Error reading build output: {}", e);
                    break;
                }
            }
        }
    });

    let wait_options = WaitContainerOptions {
        condition: "not-running",
    };
    let mut wait_stream = runtime
        .docker()
        .wait_container(&container_name, Some(wait_options));

    let exit_code = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                output_handle.abort();
                runtime.remove_container(&container_name).await?;
                return Err(RuntimeError::Cancelled);
            }
            item = wait_stream.next() => match item {
                // A non-zero exit surfaces as an error carrying the status
                // code in bollard; both arms yield the code itself.
                Some(Ok(result)) => break result.status_code,
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    break code;
                }
                Some(Err(e)) => {
                    output_handle.abort();
                    runtime.remove_container(&container_name).await?;
                    return Err(RuntimeError::Docker(e));
                }
                None => {
                    output_handle.abort();
                    runtime.remove_container(&container_name).await?;
                    return Err(RuntimeError::Other("Build wait stream ended unexpectedly".into()));
                }
            }
        }
    };

    let _ = output_handle.await;
    runtime.remove_container(&container_name).await?;

    info!("Build container {} exited with code {}", container_name, exit_code);
    Ok(exit_code)
}
