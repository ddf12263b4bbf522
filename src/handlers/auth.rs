//! Authentication HTTP handlers
//!
//! Endpoints for wallet sign-in and session management.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};

use super::AuthenticatedUser;
use crate::auth::NonceStats;
use crate::error::{ApiError, ApiResult};
use crate::models::{NonceResponse, SessionResponse, TokenResponse, VerifyRequest};
use crate::state::AppState;

/// POST /auth/nonce - Issue a single-use challenge nonce
pub async fn issue_nonce(State(state): State<AppState>) -> ApiResult<Json<NonceResponse>> {
    let nonce = state.auth_service.issue_nonce().await?;
    Ok(Json(NonceResponse { nonce }))
}

/// POST /auth/verify - Verify a signed challenge and issue a session token
pub async fn verify_signature(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> ApiResult<Json<TokenResponse>> {
    let Json(req) = payload?;

    let issued = state
        .auth_service
        .sign_in(&req.message, &req.signature)
        .await?;

    Ok(Json(issued.into()))
}

/// POST /auth/logout - Revoke the presented session
pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<StatusCode> {
    state
        .auth_service
        .logout(&user.token_id, user.expires_at)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/me - Current session
pub async fn get_current_session(user: AuthenticatedUser) -> Json<SessionResponse> {
    Json(SessionResponse {
        address: user.address,
        issued_at: user.issued_at,
        expires_at: user.expires_at,
    })
}

/// GET /auth/nonce-stats - Nonce diagnostics, hidden unless enabled
pub async fn nonce_stats(State(state): State<AppState>) -> ApiResult<Json<NonceStats>> {
    if !state.nonce_stats_enabled {
        return Err(ApiError::NotFound("/auth/nonce-stats".to_string()));
    }

    Ok(Json(state.auth_service.nonce_stats().await?))
}
