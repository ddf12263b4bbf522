//! VaultDash sign-in server
//!
//! Issues wallet sign-in challenges, verifies signed challenges and manages
//! session tokens for the dashboard.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;

use vaultdash_auth::auth::{AuthService, NonceSweeper};
use vaultdash_auth::config::{Config, SecretSource};
use vaultdash_auth::routes::app_router;
use vaultdash_auth::state::AppState;
use vaultdash_auth::store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(environment = config.environment.as_str(), "Starting VaultDash sign-in server");
    if config.session_secret_source == SecretSource::Ephemeral {
        tracing::warn!("SESSION_SECRET not set, using an ephemeral secret; sessions end on restart");
    }

    let kv = store::connect(&config)
        .await
        .context("Failed to connect to the authentication store")?;

    let auth_service = Arc::new(
        AuthService::from_config(&config, kv.clone()).context("Failed to build auth service")?,
    );

    let sweeper = NonceSweeper::start(
        auth_service.nonces().clone(),
        kv,
        config.nonce_sweep_interval,
    );

    let app_state = AppState::new(auth_service, config.nonce_stats_enabled);
    let app = app_router(app_state, &config);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    // Serve with graceful shutdown
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.stop().await;
    served.context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
