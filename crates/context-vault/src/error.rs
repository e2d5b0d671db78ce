//! Error taxonomy for the capture pipeline and the HTTP surface.
//!
//! Accept-side errors are returned synchronously to the caller; everything
//! that happens after the `202` acknowledgement only ever reaches the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Terminal and recovered outcomes inside one capture pipeline.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Stage 1 produced zero messages; the pipeline aborts with no row.
    #[error("conversation is empty after transcript resolution")]
    EmptyConversation,

    /// Summarization backend failed or timed out; recovered with the
    /// extractive fallback.
    #[error("summarizer unavailable: {0}")]
    SummarizerUnavailable(String),

    /// Embedding backend failed; recovered with the synthetic vector.
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// Insert raced a concurrent capture for the same session; retried
    /// once as an update.
    #[error("store conflict on upsert: {0}")]
    StoreConflict(String),

    /// Persistence or read-back verification failed; terminal for this
    /// request.
    #[error("store failure: {0}")]
    StoreFatal(#[from] sqlx::Error),
}

/// Errors surfaced synchronously on the HTTP surface.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// Capture queue is full; the caller should retry later.
    #[error("capture queue is full, retry later")]
    Busy,

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("store error: {0}")]
    StoreError(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Busy => StatusCode::TOO_MANY_REQUESTS,
            Self::UnknownOperation(_) => StatusCode::NOT_FOUND,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::StoreError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        Self::StoreError(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({ "error": self.to_string() });
        if matches!(self, Self::Busy) {
            body["retry_after_seconds"] = json!(5);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_maps_to_400() {
        assert_eq!(
            ApiError::bad_request("missing field").status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_busy_maps_to_429() {
        assert_eq!(ApiError::Busy.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_unknown_operation_is_client_error() {
        let status = ApiError::UnknownOperation("frobnicate".into()).status();
        assert!(status.is_client_error());
    }

    #[test]
    fn test_capture_error_display() {
        let e = CaptureError::SummarizerUnavailable("timeout".into());
        assert!(e.to_string().contains("timeout"));
    }
}
