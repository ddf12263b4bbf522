//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::auth;
use crate::state::AppState;

/// Create authentication routes
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/nonce", post(auth::issue_nonce))
        .route("/auth/verify", post(auth::verify_signature))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::get_current_session))
        .route("/auth/nonce-stats", get(auth::nonce_stats))
}
