//! HTTP router module
//!
//! The JSON surface polled by the UI and consulted by the reverse proxy.

mod handlers;

pub use handlers::ApiError;

use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Configuration;
use crate::engine::Engine;
use crate::gateway::GatewayRegistry;
use crate::ports::PortAllocator;
use crate::runtime::ContainerRuntime;
use crate::store::StateStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Run lifecycle engine
    pub engine: Arc<Engine>,

    /// Authoritative session/run records
    pub store: Arc<StateStore>,

    /// Reverse-proxy registry
    pub registry: Arc<GatewayRegistry>,

    /// Host port pool
    pub ports: Arc<PortAllocator>,

    /// Container runtime, for on-demand log reads
    pub runtime: Arc<dyn ContainerRuntime>,

    /// Global configuration
    pub config: Arc<Configuration>,
}

/// Build the HTTP router with all routes
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/sessions", post(handlers::sessions::create_session))
        .route("/sessions/:session_id", get(handlers::sessions::get_session))
        .route(
            "/sessions/:session_id/start",
            post(handlers::sessions::start_session),
        )
        .route("/runs/:run_id", get(handlers::runs::get_run))
        .route("/runs/:run_id", patch(handlers::runs::patch_run))
        .route("/runs/:run_id", delete(handlers::runs::kill_run))
        .route("/runs/:run_id/start", post(handlers::runs::start_run))
        .route("/runs/:run_id/logs", get(handlers::runs::get_logs));

    Router::new()
        .nest("/api", api_routes)
        .route(
            "/gateway/resolve/:run_id",
            get(handlers::gateway::resolve_run),
        )
        .route("/health", get(handlers::system::health))
        .route("/stats", get(handlers::system::stats))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
