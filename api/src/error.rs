use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orchestrator_core::error::{self, ApiError};
use orchestrator_mcp_runtime::tools::ToolError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Malformed or out-of-range input (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Webhook secret mismatch (401)
    Unauthorized,
    /// Referenced order does not exist (404)
    NotFound(String),
    /// Model or vendor receiver failed (502)
    Upstream(String),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();
        let plain = |error: &str, message: String| ApiError {
            error: error.to_string(),
            message,
            field: None,
            received: None,
            request_id: request_id.clone(),
            docs_hint: None,
        };

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
                    request_id: request_id.clone(),
                    docs_hint,
                },
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                plain(error::codes::UNAUTHORIZED, "unauthorized".to_string()),
            ),
            AppError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                plain(error::codes::NOT_FOUND, message),
            ),
            AppError::Upstream(message) => {
                tracing::warn!(event = "upstream_failed", error = %message);
                (
                    StatusCode::BAD_GATEWAY,
                    plain(error::codes::UPSTREAM_FAILED, message),
                )
            }
            AppError::Internal(message) => {
                tracing::error!(event = "internal_error", error = %message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    plain(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                    ),
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<ToolError> for AppError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::InvalidArgument(message) => AppError::Validation {
                message,
                field: None,
                received: None,
                docs_hint: None,
            },
            ToolError::Unauthorized => AppError::Unauthorized,
            ToolError::NotFound => AppError::NotFound(ToolError::NotFound.to_string()),
            ToolError::Validation(validation) => AppError::Validation {
                message: validation.to_string(),
                field: None,
                received: None,
                docs_hint: None,
            },
            ToolError::Upstream(upstream) => AppError::Upstream(upstream.to_string()),
            ToolError::Store(store) => AppError::Internal(store.to_string()),
        }
    }
}
