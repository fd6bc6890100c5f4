//! Run handlers

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::store::RunPatch;

use super::super::AppState;
use super::sessions::RunView;
use super::ApiError;

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: String,
}

/// Single run record
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunView>, ApiError> {
    let run = state
        .store
        .run(&run_id)
        .ok_or_else(|| ApiError::not_found(format!("Run not found: {}", run_id)))?;

    Ok(Json(RunView::new(
        run,
        &state.config.docker.preview_domain,
    )))
}

/// Merge a partial update; used by orchestrator callbacks in split
/// deployments
pub async fn patch_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(patch): Json<RunPatch>,
) -> Result<Json<RunView>, ApiError> {
    let run = state
        .store
        .update_run(&run_id, patch)
        .ok_or_else(|| ApiError::not_found(format!("Run not found: {}", run_id)))?;

    Ok(Json(RunView::new(
        run,
        &state.config.docker.preview_domain,
    )))
}

/// Terminate a run
pub async fn kill_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.kill(&run_id).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Kick off one run
pub async fn start_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.start_run(&run_id)?;
    Ok(Json(json!({ "ok": true })))
}

/// Concatenated logs of the runtime container.
///
/// Falls back to the stored start-phase buffer when no container is live
/// (the run never started, or already went through cleanup).
pub async fn get_logs(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<LogsResponse>, ApiError> {
    let run = state
        .store
        .run(&run_id)
        .ok_or_else(|| ApiError::not_found(format!("Run not found: {}", run_id)))?;

    let logs = match &run.container_id {
        Some(container) => match state.runtime.logs(container).await {
            Ok(logs) => logs,
            Err(_) => run.logs_start.contents(),
        },
        None => run.logs_start.contents(),
    };

    Ok(Json(LogsResponse { logs }))
}
