//! Long-lived runtime container execution
//!
//! Generated code runs on the isolation network with its source mounted
//! read-only, all capabilities dropped, and no privilege escalation, so a
//! hostile page cannot exfiltrate data or rewrite itself.

use std::collections::HashMap;

use bollard::container::{Config, CreateContainerOptions};
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::DockerRuntime;
use crate::runtime::traits::{
    ContainerHandle, ResourceLimits, RunSpec, RuntimeError, RuntimeResult, CONTAINER_APP_PORT,
};

/// Start the runtime container and return its handle
pub(super) async fn run_exec(
    runtime: &DockerRuntime,
    spec: RunSpec,
    cancel: CancellationToken,
) -> RuntimeResult<ContainerHandle> {
    let container_name = spec.container_name();
    let limits = ResourceLimits::run_phase();

    runtime.ensure_image(&spec.image, &cancel).await?;
    runtime.remove_container(&container_name).await?;

    if cancel.is_cancelled() {
        return Err(RuntimeError::Cancelled);
    }

    let env_vars: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let port_key = format!("{}/tcp", CONTAINER_APP_PORT);

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(port_key.clone(), HashMap::new());

    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    port_bindings.insert(
        port_key,
        Some(vec![PortBinding {
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(spec.host_port.to_string()),
        }]),
    );

    let mut tmpfs = HashMap::new();
    tmpfs.insert("/tmp".to_string(), "rw,noexec,nosuid,size=64M".to_string());

    let host_config = HostConfig {
        mounts: Some(vec![Mount {
            target: Some("/workspace".to_string()),
            source: Some(spec.workspace.to_string_lossy().to_string()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(true),
            ..Default::default()
        }]),
        tmpfs: Some(tmpfs),
        port_bindings: Some(port_bindings),
        memory: Some(limits.memory),
        cpu_quota: Some(limits.cpu_quota),
        cpu_period: Some(limits.cpu_period),
        pids_limit: Some(limits.pids_limit),
        network_mode: Some(spec.network.clone()),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        ..Default::default()
    };

    let config = Config {
        image: Some(spec.image.clone()),
        cmd: Some(vec![
            "sh".to_string(),
            "-lc".to_string(),
            "npm run start".to_string(),
        ]),
        env: Some(env_vars),
        working_dir: Some("/workspace".to_string()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: container_name.as_str(),
        platform: None,
    };
    let created = runtime.docker().create_container(Some(options), config).await?;
    debug!("Created runtime container {}", container_name);

    if let Err(e) = runtime
        .docker()
        .start_container::<String>(&container_name, None)
        .await
    {
        // Leave nothing behind when start fails
        runtime.remove_container(&container_name).await?;
        return Err(RuntimeError::StartFailed(e.to_string()));
    }

    let info = runtime.docker().inspect_container(&container_name, None).await?;
    let internal_ip = info
        .network_settings
        .and_then(|settings| settings.networks)
        .and_then(|networks| networks.get(&spec.network).cloned())
        .and_then(|endpoint| endpoint.ip_address)
        .unwrap_or_default();

    info!(
        "Started runtime container {} on port {} (internal {})",
        container_name, spec.host_port, internal_ip
    );

    Ok(ContainerHandle {
        id: created.id,
        host_port: spec.host_port,
        internal_ip,
    })
}
