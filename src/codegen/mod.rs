//! Code-generation gateway boundary
//!
//! The model gateway is an external collaborator: given a prompt and a
//! (provider, model) pair it returns a map of filename to content. The call
//! is blocking and may take minutes; the orchestrator imposes no timeout of
//! its own but must remain cancellable.

mod validate;

pub use validate::{validate_files, ValidationError};

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::GatewayConfiguration;
use crate::store::Provider;

/// Errors from the code-generation gateway
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("Gateway request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Gateway error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Generation cancelled")]
    Cancelled,
}

pub type CodegenResult<T> = Result<T, CodegenError>;

/// Map of relative filename to file content
pub type GeneratedFiles = HashMap<String, String>;

/// Boundary over the external prompt-to-code gateway
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        provider: Provider,
        model: &str,
        cancel: &CancellationToken,
    ) -> CodegenResult<GeneratedFiles>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    provider: Provider,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    files: GeneratedFiles,
}

/// HTTP client for the model gateway
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfiguration) -> CodegenResult<Self> {
        // Generation takes minutes; only the connect phase is bounded
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl CodeGenerator for GatewayClient {
    async fn generate(
        &self,
        prompt: &str,
        provider: Provider,
        model: &str,
        cancel: &CancellationToken,
    ) -> CodegenResult<GeneratedFiles> {
        let url = format!("{}/v1/generate", self.base_url);
        let body = GenerateRequest {
            prompt,
            provider,
            model,
        };

        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(CodegenError::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CodegenError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = tokio::select! {
            _ = cancel.cancelled() => return Err(CodegenError::Cancelled),
            parsed = response.json() => parsed?,
        };

        debug!(
            "Gateway returned {} files for {}/{}",
            parsed.files.len(),
            provider,
            model
        );
        Ok(parsed.files)
    }
}
