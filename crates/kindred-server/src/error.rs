//! Error handling for the REST API server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

use kindred_core::error::KindredError;

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    // Common error constructors
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.status, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };

        (self.status, Json(body)).into_response()
    }
}

// Convert from kindred-core errors
impl From<KindredError> for ApiError {
    fn from(err: KindredError) -> Self {
        let code = err.code().as_str();
        let message = err.to_string();

        let (status, details) = match &err {
            KindredError::Validation { details, .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                (!details.is_empty()).then(|| serde_json::json!(details)),
            ),
            KindredError::NotFound { .. } => (StatusCode::NOT_FOUND, None),
            KindredError::Conflict { .. } => (StatusCode::CONFLICT, None),
            KindredError::InvalidState { state, .. } => {
                (StatusCode::CONFLICT, Some(serde_json::json!({ "state": state })))
            }
            KindredError::Configuration(_) => (StatusCode::BAD_REQUEST, None),
            KindredError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, None),
            KindredError::Generation { .. } => (StatusCode::BAD_GATEWAY, None),
            KindredError::Repository { .. } | KindredError::Database { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, None)
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        if status.is_server_error() {
            tracing::error!(code, error = %message, "Request failed");
        }

        let api = ApiError::new(status, code, message);
        match details {
            Some(details) => api.with_details(details),
            None => api,
        }
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
