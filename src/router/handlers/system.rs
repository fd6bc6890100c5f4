//! Liveness and stats handlers

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use super::super::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub active_containers: usize,
    pub registered_runs: usize,
    pub ports_in_use: usize,
    pub active_runs: usize,
    pub sessions: usize,
    pub runs: usize,
}

/// Liveness probe
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Orchestrator counters
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        active_containers: state.store.active_container_count(),
        registered_runs: state.registry.size(),
        ports_in_use: state.ports.used_count(),
        active_runs: state.engine.active_run_count(),
        sessions: state.store.session_count(),
        runs: state.store.run_count(),
    })
}
