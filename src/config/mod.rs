//! Configuration management module
//!
//! Environment-driven configuration for the daemon.

mod config;

pub use config::{
    ApiConfiguration, CallbackConfiguration, Configuration, DockerConfiguration,
    GatewayConfiguration, HealthConfiguration, PortRangeConfiguration, WorkspaceConfiguration,
};
