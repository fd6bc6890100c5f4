//! Reverse-proxy resolution handler

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use super::super::AppState;
use super::ApiError;

/// Resolve a run identifier to its internal URL.
///
/// Consulted by the reverse proxy on every preview request; only `ready`
/// runs are present in the registry.
pub async fn resolve_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = state
        .registry
        .resolve(&run_id)
        .ok_or_else(|| ApiError::not_found(format!("No ready run: {}", run_id)))?;

    Ok(Json(json!({ "url": url })))
}
