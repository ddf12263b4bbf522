//! Centralized API error handling
//!
//! Maps service errors onto HTTP status codes and a JSON body of the form
//! `{"error": {"code": ..., "message": ...}}`.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::{AuthError, ChallengeError};

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Challenge(ChallengeError),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Challenge(e) => e.code(),
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Challenge(ChallengeError::StoreUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Challenge(e) if e.is_malformed() => StatusCode::BAD_REQUEST,
            ApiError::Challenge(_) => StatusCode::UNAUTHORIZED,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %message, code = %error_code, "Server error occurred");
        } else {
            tracing::debug!(error = %message, code = %error_code, "Client error occurred");
        }

        (status, Json(ErrorResponse::new(error_code, message))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Challenge(e) => ApiError::Challenge(e),
            AuthError::Session(e) => {
                tracing::error!(error = %e, "Session token could not be issued");
                ApiError::InternalError("failed to issue session".to_string())
            }
            AuthError::Store(e) => {
                tracing::error!(error = %e, "Authentication store failure");
                ApiError::ServiceUnavailable("authentication store unavailable".to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MessageError, SessionError};
    use crate::store::StoreError;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError::NotFound("test".to_string()).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            ApiError::Challenge(ChallengeError::NonceAlreadyUsed).error_code(),
            "NONCE_ALREADY_USED"
        );
        assert_eq!(
            ApiError::Challenge(ChallengeError::NonceAlreadyUsed).to_string(),
            "nonce already used"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Challenge(ChallengeError::InvalidSignature).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Challenge(ChallengeError::MalformedMessage(MessageError::InvalidHeader))
                .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Challenge(ChallengeError::MalformedSignature).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Challenge(ChallengeError::StoreUnavailable(StoreError::Unavailable(
                "down".to_string()
            )))
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::InternalError("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_failure_hides_detail() {
        let err: ApiError =
            AuthError::Store(StoreError::Unavailable("10.0.0.7:6379 refused".into())).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.to_string().contains("6379"));
    }

    #[test]
    fn test_session_failure_hides_detail() {
        let detail = "InvalidKeyFormat while encoding header";
        let err: ApiError =
            AuthError::Session(SessionError::EncodingFailed(detail.to_string())).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert!(!err.to_string().contains("InvalidKeyFormat"));
        assert!(err.to_string().contains("failed to issue session"));
    }
}
