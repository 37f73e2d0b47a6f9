//! HTTP error type shared by all handlers.
//!
//! Client errors carry their message to the caller; internal errors are logged
//! in full and reported with a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::orchestrator::PipelineError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Pipeline(e) => {
                tracing::error!(error = %e, "Failed to ingest upload");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error processing video".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
