//! REST API Shared Types
//!
//! Response shapes and helpers used by both the replica and controller
//! routers. Success bodies are JSON strings; failures carry a stable error
//! code next to the human-readable message.

use crate::error::Error;
use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&Error> for ApiErrorResponse {
    fn from(e: &Error) -> Self {
        Self {
            error: e.code().to_string(),
            message: e.to_string(),
            details: None,
        }
    }
}

/// Render an error with its status and code
pub fn error_response(e: &Error) -> Response {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    warn!("Request failed ({}): {}", e.code(), e);
    (status, Json(ApiErrorResponse::from(e))).into_response()
}

/// Render a success body as a JSON string
pub fn json_message(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(message.into())).into_response()
}

/// Health check
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
