use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use orion_store::StoreError;

use crate::registry::SinkError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upload too large: {size} bytes (max {max})")]
    UploadTooLarge { size: usize, max: usize },

    #[error("Request body too large: {0}")]
    BodyTooLarge(String),

    #[error("Upload storage error: {0}")]
    UploadStorage(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(inner) => ServerError::Validation(inner.to_string()),
            other => ServerError::Storage(other),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::UploadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
            ServerError::BodyTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ServerError::UploadStorage(_) => {
                tracing::error!(error = %self, "Upload storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Upload storage error".to_string())
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            ServerError::Storage(_) => {
                tracing::error!(error = %self, "Persistence failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Error saving data".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Why a live session could not be bootstrapped or kept alive.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to load items: {0}")]
    Store(#[from] StoreError),

    #[error("failed to write to peer: {0}")]
    Sink(#[from] SinkError),
}
