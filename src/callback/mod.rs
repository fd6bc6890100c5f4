//! Best-effort UI callbacks
//!
//! Every run transition is mirrored to the UI's run endpoint with a PATCH
//! carrying the delta. The in-process store stays authoritative; a failed
//! PATCH is logged and ignored so it can never stall the pipeline.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::config::CallbackConfiguration;
use crate::store::Run;

/// HTTP client for advisory run updates to the UI
pub struct CallbackClient {
    client: reqwest::Client,
    base_url: String,
    enabled: bool,
}

impl CallbackClient {
    pub fn new(config: &CallbackConfiguration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            enabled: config.enabled,
        }
    }

    /// Client that never sends anything; used by single-process deployments
    /// and tests
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: String::new(),
            enabled: false,
        }
    }

    /// PATCH the run's current state to the UI; advisory only
    pub async fn patch_run(&self, run: &Run) {
        if !self.enabled {
            return;
        }

        let url = format!("{}/api/runs/{}", self.base_url, run.id);
        let body = json!({
            "status": run.status,
            "port": run.port,
            "containerId": run.container_id,
            "internalUrl": run.internal_url,
            "error": run.error,
            "startedAt": run.started_at,
            "completedAt": run.completed_at,
        });

        match self.client.patch(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Patched run {} to UI ({})", run.id, run.status);
            }
            Ok(response) => {
                warn!(
                    "UI rejected patch for run {}: {}",
                    run.id,
                    response.status()
                );
            }
            Err(e) => {
                warn!("Failed to patch run {} to UI: {}", run.id, e);
            }
        }
    }
}
