//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::AuthService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub nonce_stats_enabled: bool,
}

impl AppState {
    pub fn new(auth_service: Arc<AuthService>, nonce_stats_enabled: bool) -> Self {
        Self {
            auth_service,
            nonce_stats_enabled,
        }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_service.clone()
    }
}
