//! Configuration structures and loading
//!
//! All settings come from the environment with sensible defaults, so the
//! daemon can run with zero configuration on a developer machine.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Main daemon configuration
#[derive(Debug, Clone)]
pub struct Configuration {
    /// HTTP API configuration
    pub api: ApiConfiguration,

    /// Host port pool handed to runtime containers
    pub ports: PortRangeConfiguration,

    /// Workspace directories
    pub workspace: WorkspaceConfiguration,

    /// Docker engine settings
    pub docker: DockerConfiguration,

    /// Code-generation gateway settings
    pub gateway: GatewayConfiguration,

    /// UI callback settings
    pub callback: CallbackConfiguration,

    /// Health probe settings
    pub health: HealthConfiguration,
}

impl Configuration {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = Self {
            api: ApiConfiguration {
                host: env_or("ORCHESTRATOR_HOST", "0.0.0.0"),
                port: env_parse("ORCHESTRATOR_PORT", 8080)?,
            },
            ports: PortRangeConfiguration {
                start: env_parse("PORT_RANGE_START", 3001)?,
                end: env_parse("PORT_RANGE_END", 4000)?,
            },
            workspace: WorkspaceConfiguration {
                base: PathBuf::from(env_or("WORKSPACE_BASE", "/tmp/arena-workspaces")),
                template_dir: PathBuf::from(env_or("TEMPLATE_DIR", "./template")),
            },
            docker: DockerConfiguration {
                socket: env_or("DOCKER_SOCKET", "/var/run/docker.sock"),
                network: env_or("ISOLATION_NETWORK_NAME", "arena-isolation"),
                build_image: env_or("BUILD_IMAGE", "node:20-alpine"),
                runtime_image: env_or("RUNTIME_IMAGE", "node:20-alpine"),
                public_host: env_or("PUBLIC_HOST", "127.0.0.1"),
                preview_domain: env_or("PREVIEW_DOMAIN", "preview.localhost"),
            },
            gateway: GatewayConfiguration {
                url: env_or("GATEWAY_URL", "http://localhost:4080"),
                api_key: env::var("GATEWAY_API_KEY").unwrap_or_default(),
            },
            callback: CallbackConfiguration {
                url: env_or("MAIN_APP_URL", "http://localhost:3000"),
                enabled: env_or("CALLBACK_ENABLED", "true") == "true",
            },
            health: HealthConfiguration::default(),
        };

        if config.ports.start > config.ports.end {
            anyhow::bail!(
                "PORT_RANGE_START ({}) must not exceed PORT_RANGE_END ({})",
                config.ports.start,
                config.ports.end
            );
        }

        std::fs::create_dir_all(&config.workspace.base).with_context(|| {
            format!(
                "Failed to create workspace base: {}",
                config.workspace.base.display()
            )
        })?;

        Ok(config)
    }
}

/// HTTP API configuration
#[derive(Debug, Clone)]
pub struct ApiConfiguration {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

/// Inclusive host port range for runtime containers
#[derive(Debug, Clone)]
pub struct PortRangeConfiguration {
    pub start: u16,
    pub end: u16,
}

/// Workspace directories
#[derive(Debug, Clone)]
pub struct WorkspaceConfiguration {
    /// Base directory holding one scratch directory per run
    pub base: PathBuf,

    /// Deployer-supplied project skeleton overlaid with model output.
    /// Materialization proceeds without it when the directory is absent.
    pub template_dir: PathBuf,
}

/// Docker engine settings
#[derive(Debug, Clone)]
pub struct DockerConfiguration {
    /// Engine socket path
    pub socket: String,

    /// Name of the bridge network runtime containers are confined to
    pub network: String,

    /// Image used for the one-shot build container
    pub build_image: String,

    /// Image used for the long-lived runtime container
    pub runtime_image: String,

    /// Host part of internal URLs handed to the reverse proxy
    pub public_host: String,

    /// Domain under which the reverse proxy exposes ready runs
    pub preview_domain: String,
}

/// Code-generation gateway settings
#[derive(Debug, Clone)]
pub struct GatewayConfiguration {
    /// Base URL of the model gateway
    pub url: String,

    /// Opaque credential forwarded as a bearer token
    pub api_key: String,
}

/// UI callback settings
#[derive(Debug, Clone)]
pub struct CallbackConfiguration {
    /// Base URL of the UI application
    pub url: String,

    /// Whether PATCH callbacks are issued at all
    pub enabled: bool,
}

/// Health probe settings
///
/// Fixed in production; carried in configuration so tests can shrink the
/// loop instead of waiting out the 65 second ceiling.
#[derive(Debug, Clone)]
pub struct HealthConfiguration {
    /// Per-request timeout
    pub timeout: Duration,

    /// Pause between attempts
    pub interval: Duration,

    /// Maximum number of attempts before the run fails
    pub attempts: u32,
}

impl Default for HealthConfiguration {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            interval: Duration::from_secs(2),
            attempts: 30,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, value)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_defaults() {
        let health = HealthConfiguration::default();
        assert_eq!(health.timeout, Duration::from_secs(5));
        assert_eq!(health.interval, Duration::from_secs(2));
        assert_eq!(health.attempts, 30);
    }

    #[test]
    fn test_env_parse_default() {
        let port: u16 = env_parse("ARENA_TEST_UNSET_VARIABLE", 8080).unwrap();
        assert_eq!(port, 8080);
    }
}
