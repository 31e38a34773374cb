use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Everything that can go wrong while proxying jobs or artifacts.
///
/// None of these are retried; each one is the terminal outcome of the
/// operation that produced it.
#[derive(Debug, Error)]
pub enum AppError {
    /// Required environment values are missing.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    /// Non-success response from the job endpoint or the object store.
    #[error("Remote API error: {status} {status_text}")]
    Remote { status: u16, status_text: String },

    /// The remote job reported `FAILED`.
    #[error("{0}")]
    JobFailed(String),

    #[error("Task timed out after {attempts} status checks ({elapsed_secs}s)")]
    Timeout { attempts: u32, elapsed_secs: u64 },

    #[error("Task {0} completed without a result payload")]
    CompletedWithoutResult(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Remote { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::JobFailed(_) | AppError::CompletedWithoutResult(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Http(_) | AppError::Decode(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Remote { .. } => "REMOTE_ERROR",
            AppError::JobFailed(_) => "JOB_FAILED",
            AppError::Timeout { .. } => "TIMEOUT",
            AppError::CompletedWithoutResult(_) => "COMPLETED_WITHOUT_RESULT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Http(_) => "HTTP_ERROR",
            AppError::Decode(_) => "DECODE_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(code = self.code(), status = %status, "❌ {}", message);
        } else {
            tracing::warn!(code = self.code(), status = %status, "⚠️ {}", message);
        }

        let body = json!({
            "error": message,
            "code": self.code(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn remote_errors_keep_the_remote_status() {
        let err = AppError::Remote { status: 401, status_text: "Unauthorized".into() };
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "Remote API error: 401 Unauthorized");
    }

    #[test]
    fn taxonomy_maps_to_distinct_statuses() {
        assert_eq!(AppError::Config("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::JobFailed("x".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::Timeout { attempts: 120, elapsed_secs: 600 }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unknown_remote_status_falls_back_to_bad_gateway() {
        let err = AppError::Remote { status: 42, status_text: String::new() };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
