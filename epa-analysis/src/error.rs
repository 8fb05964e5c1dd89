//! Error types for epa-analysis
//!
//! - [`ApiError`]: HTTP-facing errors with a JSON body
//! - [`OrchestrationError`]: run-level faults that end a run in `failed`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{RunStatus, CANCELLED_ERROR};
use crate::services::aggregator::AggregationError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. the owner already has an active run
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Submission rate exceeded (429)
    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// epa-common error
    #[error("Common error: {0}")]
    Common(#[from] epa_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::TooManyRequests(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_REQUESTS", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(epa_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(epa_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Run-level fault
///
/// Its `Display` text becomes the run's `last_error`.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("storage failure: {0}")]
    Storage(#[from] epa_common::Error),

    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("{}", CANCELLED_ERROR)]
    Cancelled,

    #[error("run timed out after {0}s")]
    Timeout(u64),

    #[error("invalid run transition {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("phase {phase_number} could not run: {reason}")]
    PhaseStructure { phase_number: u8, reason: String },

    #[error("run {0} not found")]
    RunNotFound(Uuid),
}
