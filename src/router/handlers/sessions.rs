//! Session handlers

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::store::{Provider, Run, RunStatus, Session};

use super::super::AppState;
use super::ApiError;

/// Minimum accepted prompt length
const MIN_PROMPT_CHARS: usize = 10;

/// Maximum runs per session
const MAX_MODELS: usize = 6;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub prompt: String,
    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub run_ids: Vec<String>,
}

/// Run joined with its derived public preview URL
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    #[serde(flatten)]
    pub run: Run,
    pub public_url: Option<String>,
}

impl RunView {
    pub fn new(run: Run, preview_domain: &str) -> Self {
        let public_url = (run.status == RunStatus::Ready)
            .then(|| format!("http://{}.{}", run.id, preview_domain));
        Self { run, public_url }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub prompt: String,
    pub runs: Vec<RunView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionResponse {
    fn new(session: Session, runs: Vec<Run>, preview_domain: &str) -> Self {
        Self {
            id: session.id,
            prompt: session.prompt,
            runs: runs
                .into_iter()
                .map(|run| RunView::new(run, preview_domain))
                .collect(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

/// Create a session with one run per model and start them all
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    if request.prompt.trim().chars().count() < MIN_PROMPT_CHARS {
        return Err(ApiError::bad_request(format!(
            "Prompt must be at least {} characters",
            MIN_PROMPT_CHARS
        )));
    }
    if request.models.is_empty() || request.models.len() > MAX_MODELS {
        return Err(ApiError::bad_request(format!(
            "Between 1 and {} models required",
            MAX_MODELS
        )));
    }

    let mut models = Vec::with_capacity(request.models.len());
    for spec in &request.models {
        let provider: Provider = spec
            .provider
            .parse()
            .map_err(|e: String| ApiError::bad_request(e))?;
        if spec.model.trim().is_empty() {
            return Err(ApiError::bad_request("Model name must not be empty"));
        }
        models.push((provider, spec.model.clone()));
    }

    let session = state.store.create_session(request.prompt, models);
    state
        .engine
        .start_session(&session.id)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(CreateSessionResponse {
        session_id: session.id,
        run_ids: session.run_ids,
    }))
}

/// Full session with runs joined by latest state
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let (session, runs) = state
        .store
        .session_view(&session_id)
        .ok_or_else(|| ApiError::not_found(format!("Session not found: {}", session_id)))?;

    Ok(Json(SessionResponse::new(
        session,
        runs,
        &state.config.docker.preview_domain,
    )))
}

/// Kick off every startable run in a session
pub async fn start_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.start_session(&session_id)?;
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_view_public_url_only_when_ready() {
        let mut run = Run::new(
            "r1".into(),
            "s1".into(),
            Provider::Openai,
            "gpt-4o".into(),
        );

        let view = RunView::new(run.clone(), "preview.localhost");
        assert!(view.public_url.is_none());

        run.status = RunStatus::Ready;
        let view = RunView::new(run, "preview.localhost");
        assert_eq!(
            view.public_url.as_deref(),
            Some("http://r1.preview.localhost")
        );
    }

    #[test]
    fn test_run_view_flattens_run_fields() {
        let run = Run::new(
            "r1".into(),
            "s1".into(),
            Provider::Openai,
            "gpt-4o".into(),
        );
        let value = serde_json::to_value(RunView::new(run, "preview.localhost")).unwrap();

        assert_eq!(value["id"], "r1");
        assert_eq!(value["status"], "queued");
        assert!(value["publicUrl"].is_null());
    }
}
