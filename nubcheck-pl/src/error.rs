//! Error types for nubcheck-pl HTTP handlers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::lifecycle::LifecycleError;
use crate::payments::PaymentError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or wrong credentials (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Signed URL rejected (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict (409) - e.g. referral code already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Required secret or collaborator not configured (500)
    #[error("Server misconfiguration: {0}")]
    Misconfigured(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// nubcheck-common error
    #[error("Common error: {0}")]
    Common(#[from] nubcheck_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Misconfigured(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "MISCONFIGURED",
                msg,
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(nubcheck_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(nubcheck_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => {
                tracing::error!(error = %err, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    err.to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidSession(_) => ApiError::BadRequest("Invalid session".to_string()),
            LifecycleError::PaymentNotCompleted => {
                ApiError::BadRequest("Payment not completed".to_string())
            }
            LifecycleError::MissingEmail(_) => {
                ApiError::BadRequest("Customer email missing".to_string())
            }
            LifecycleError::NotFound(id) => ApiError::NotFound(format!("Prediction {}", id)),
            LifecycleError::Image(e) if e.is_client_error() => ApiError::BadRequest(e.to_string()),
            LifecycleError::Image(e) => ApiError::Internal(format!("Image storage failed: {}", e)),
            LifecycleError::Classifier(_) => ApiError::Internal("Failed to analyze image".to_string()),
            LifecycleError::Payment(PaymentError::NotConfigured(what)) => ApiError::Misconfigured(what),
            LifecycleError::Payment(e) => {
                tracing::error!(error = %e, "Payment provider request failed");
                ApiError::Internal("Failed to verify payment".to_string())
            }
            LifecycleError::Store(e) => ApiError::Common(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::Misconfigured("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ApiError::Common(nubcheck_common::Error::NotFound("p1".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Common(nubcheck_common::Error::InvalidInput("bad".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Common(nubcheck_common::Error::Internal("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_lifecycle_errors_map_to_client_or_server() {
        let client: ApiError = LifecycleError::PaymentNotCompleted.into();
        assert_eq!(client.into_response().status(), StatusCode::BAD_REQUEST);

        let missing: ApiError = LifecycleError::NotFound("p1".into()).into();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let too_big: ApiError = LifecycleError::Image(crate::images::ImageStoreError::TooLarge {
            size: 20,
            max: 10,
        })
        .into();
        assert_eq!(too_big.into_response().status(), StatusCode::BAD_REQUEST);

        let upstream: ApiError = LifecycleError::Payment(PaymentError::Network("reset".into())).into();
        assert_eq!(upstream.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
