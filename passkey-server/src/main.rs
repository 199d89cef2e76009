//! Passkey Server - REST API for passwordless WebAuthn sign-in
//!
//! Exposes passkey-core's four-step flow via HTTP endpoints:
//! - POST /api/auth/register, /api/auth/verify-registration
//! - POST /api/auth/authenticate, /api/auth/verify-authentication
//! - GET  /api/auth/me, /api/auth/logout

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use passkey_core::{RelyingParty, RelyingPartyConfig};
use passkey_server::{create_router_with_state, storage, AppState, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("passkey_server=info,passkey_core=info,tower_http=info")
            }),
        )
        .init();

    let config = Config::from_env();
    let rp_config =
        RelyingPartyConfig::from_env().context("invalid relying party configuration")?;

    tracing::info!(
        rp_id = %rp_config.rp_id,
        origins = ?rp_config.origins,
        challenge_ttl_secs = rp_config.challenge_ttl.as_secs(),
        user_verification = ?rp_config.user_verification,
        "Relying party configured"
    );

    let store = storage::open(&config)
        .await
        .context("failed to open key-value storage")?;
    let state = AppState::new(rp_config, store);

    if let Some(interval) = config.sweep_interval() {
        tokio::spawn(sweep_expired(state.rp.clone(), interval));
    }

    let app = create_router_with_state(&config, state);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Periodically remove expired challenges and sessions. Reads already treat
/// expired entries as absent; this only reclaims space.
async fn sweep_expired(rp: RelyingParty, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match rp.purge_expired().await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Purged expired entries"),
            Err(e) => tracing::warn!(error = %e, "Expired entry sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
