//! Unified API error type with consistent JSON responses.
//!
//! Handlers return `Result<impl IntoResponse, ApiError>`; each variant maps
//! to a status code and a `{"error": "<message>"}` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// HTTP 400 -- malformed or invalid request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// HTTP 404 -- no such resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP 503 -- a required subsystem cannot take the request right now.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// HTTP 500 -- unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<am_store::StoreError> for ApiError {
    fn from(err: am_store::StoreError) -> Self {
        match err {
            am_store::StoreError::NotFound(what) => ApiError::NotFound(what),
            am_store::StoreError::InvalidTransition { .. } => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
