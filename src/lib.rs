//! VaultDash sign-in backend
//!
//! Wallet sign-in with replay-protected challenges, stateless session tokens
//! and logout revocation, served over axum.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
