use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use waitwith_core::error::{self, ApiError};
use waitwith_core::store::StoreError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Unknown resource (404)
    NotFound { resource: String },
    /// Record store failure (503 when retryable)
    Store(StoreError),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                    retryable: false,
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: Some(
                        "Records are created through POST /v1/chat. List them with GET /v1/countdowns."
                            .to_string(),
                    ),
                    retryable: false,
                },
            ),
            AppError::Store(err) => {
                tracing::error!("Store error: {}", err);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError {
                        error: error::codes::TRANSIENT.to_string(),
                        message: "The record store is temporarily unavailable".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                        retryable: true,
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                        retryable: false,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            // Reads never hit a unique constraint, so a duplicate here is a bug.
            StoreError::Duplicate(key) => {
                AppError::Internal(format!("unexpected duplicate on {key:?}"))
            }
            other => AppError::Store(other),
        }
    }
}
