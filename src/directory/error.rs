use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("Server registry is full")]
    CapacityExceeded,

    #[error("Server not found")]
    NotFound,

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for DirectoryError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            DirectoryError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            DirectoryError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            DirectoryError::CapacityExceeded => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            DirectoryError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            DirectoryError::Database(err) => {
                // Internals stay in the log, never in the response body.
                error!(error = %err, "directory database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
