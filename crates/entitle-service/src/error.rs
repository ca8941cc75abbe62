//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use entitle_core::BillingError;
use entitle_store::StoreError;

use crate::executor::ExecutionError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - duplicate attachment, concurrent update, or invalid
    /// state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External processor error, with the failed sub-action named.
    #[error("processor error: {0}")]
    Processor(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            Self::Processor(msg) => (StatusCode::BAD_GATEWAY, "processor_error", msg.clone()),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        if err.is_not_found() {
            Self::NotFound(err.to_string())
        } else if err.is_conflict() {
            Self::Conflict(err.to_string())
        } else {
            Self::BadRequest(err.to_string())
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::RevisionConflict { .. } => Self::Conflict(err.to_string()),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Processor { .. } => Self::Processor(err.to_string()),
            ExecutionError::Store(store_err) => store_err.into(),
            ExecutionError::ProcessorUnavailable => {
                Self::BadRequest("payment processor is not configured".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use entitle_core::CustomerId;

    use super::*;

    #[test]
    fn billing_error_mapping() {
        let err = BillingError::CustomerNotFound {
            customer_id: CustomerId::new("cus-1").unwrap(),
        };
        assert!(matches!(ApiError::from(err), ApiError::NotFound(_)));

        let err = BillingError::ProcessorMismatch {
            customer_id: CustomerId::new("cus-1").unwrap(),
        };
        assert!(matches!(ApiError::from(err), ApiError::Conflict(_)));

        let err = BillingError::InvalidRequest("nope".into());
        assert!(matches!(ApiError::from(err), ApiError::BadRequest(_)));
    }
}
