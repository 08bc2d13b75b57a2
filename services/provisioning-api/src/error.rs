//! Service errors and their HTTP mapping

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use site_allocator::{AllocationError, ErrorKind};
use thiserror::Error;
use tracing::error;

/// Startup failures
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    error_kind: ErrorKind,
}

/// Request failure, rendered as `{error, errorKind}`
#[derive(Debug)]
pub struct ApiError(pub AllocationError);

impl From<AllocationError> for ApiError {
    fn from(err: AllocationError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(AllocationError::Validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(AllocationError::Validation(rejection.body_text()))
    }
}

impl ApiError {
    /// HTTP status for the error kind
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::ConcurrentConflict => StatusCode::CONFLICT,
            ErrorKind::ConfigurationMissing | ErrorKind::ResourceExhausted | ErrorKind::ValidationError => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::StoreFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            error_kind: self.0.kind(),
        };
        (status, Json(body)).into_response()
    }
}
