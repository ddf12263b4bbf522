//! Authentication middleware
//!
//! Bearer token extraction and the authentication gate.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::auth::{AuthService, SessionClaims};
use crate::error::ErrorResponse;

/// Authenticated wallet extracted from a session token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub address: String,
    pub token_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<SessionClaims> for AuthenticatedUser {
    fn from(claims: SessionClaims) -> Self {
        Self {
            address: claims.address,
            token_id: claims.token_id,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
        }
    }
}

fn unauthorized(code: &str, message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new(code, message))).into_response()
}

/// Extractor for authenticated users
///
/// Invalid, expired and revoked tokens are indistinguishable to the caller, and
/// so is a failed revocation lookup.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(user: AuthenticatedUser) -> impl IntoResponse {
///     format!("Hello, {}", user.address)
/// }
/// ```
#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    unauthorized(
                        "MISSING_TOKEN",
                        "Authorization header with Bearer token required",
                    )
                })?;

        let auth_service = Arc::<AuthService>::from_ref(state);

        let claims = auth_service
            .authenticate(bearer.token())
            .await
            .map_err(|e| {
                tracing::debug!(reason = %e, "Authentication gate refused token");
                unauthorized("INVALID_TOKEN", "Invalid or expired token")
            })?;

        Ok(claims.into())
    }
}
