//! Translation of service failures into HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use ratecache_common::RateCacheError;

/// One failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    #[schema(value_type = String, example = "limit")]
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Failure returned from a request handler.
#[derive(Debug)]
pub enum ApiError {
    /// Request input failed validation.
    InvalidInput(Vec<FieldError>),
    /// The cache could not answer.
    Cache(RateCacheError),
}

impl From<RateCacheError> for ApiError {
    fn from(err: RateCacheError) -> Self {
        ApiError::Cache(err)
    }
}

/// Body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    #[schema(value_type = String, example = "error")]
    status: &'static str,
    message: String,
    /// Present only when request input failed validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldError>>,
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Cache(RateCacheError::UpstreamUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the message is safe to show the caller.
    fn is_operational(&self) -> bool {
        match self {
            ApiError::InvalidInput(_) => true,
            ApiError::Cache(e) => e.is_upstream(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let ApiError::Cache(e) = &self {
            error!(
                status = status.as_u16(),
                error_code = e.error_code(),
                operational = self.is_operational(),
                error = %e.chain(),
                "Error occurred during request processing"
            );
        }

        let message = if self.is_operational() {
            match &self {
                ApiError::InvalidInput(_) => "Invalid input".to_string(),
                ApiError::Cache(e) => e.to_string(),
            }
        } else {
            "Internal server error".to_string()
        };

        let details = match self {
            ApiError::InvalidInput(details) => Some(details),
            ApiError::Cache(_) => None,
        };

        let body = ErrorBody {
            status: "error",
            message,
            details,
        };
        (status, Json(body)).into_response()
    }
}
