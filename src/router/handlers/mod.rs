//! HTTP request handlers

pub mod gateway;
pub mod runs;
pub mod sessions;
pub mod system;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::engine::KillError;

/// Standard error response
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.status.canonical_reason().unwrap_or("Error"),
                "message": self.message
            })),
        )
            .into_response()
    }
}

impl From<KillError> for ApiError {
    fn from(err: KillError) -> Self {
        match &err {
            KillError::NotFound(_) => ApiError::not_found(err.to_string()),
            KillError::Cleanup(_) => ApiError::internal(err.to_string()),
        }
    }
}
