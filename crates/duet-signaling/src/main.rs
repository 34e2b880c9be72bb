//! Duet signaling server.
//!
//! # Servers
//!
//! - WebSocket signaling on `DUET_SIGNALING_BIND_ADDRESS` (default 0.0.0.0:3000)
//! - Health and metrics on `DUET_HEALTH_BIND_ADDRESS` (default 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus metrics recorder
//! 4. Build the `SessionManager`
//! 5. Bind both listeners, then spawn the servers
//! 6. Mark ready and wait for a shutdown signal
//! 7. Mark not ready, cancel every connection, wait the grace period

#![warn(clippy::pedantic)]

use std::sync::Arc;

use common::config::{LogFormat, ObservabilityConfig};
use duet_signaling::config::Config;
use duet_signaling::observability::{init_metrics_recorder, HealthState};
use duet_signaling::routes::{build_ops_routes, build_routes, AppState};
use duet_signaling::session::SessionManager;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Config first: the log format comes from it.
    let config = Config::from_env()?;
    init_tracing(&config.observability);

    info!(
        instance_id = %config.instance_id,
        signaling_bind_address = %config.signaling_bind_address,
        health_bind_address = %config.health_bind_address,
        mailbox_capacity = config.mailbox_capacity,
        max_frame_bytes = config.max_frame_bytes,
        heartbeat_interval_seconds = config.heartbeat_interval_seconds,
        shutdown_grace_seconds = config.shutdown_grace_seconds,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let session = Arc::new(SessionManager::new(config.mailbox_capacity));
    let shutdown_token = session.child_token();

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(config.health_bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.health_bind_address, "Failed to bind health server");
            format!("Failed to bind health server to {}: {e}", config.health_bind_address)
        })?;
    let signaling_listener = tokio::net::TcpListener::bind(config.signaling_bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.signaling_bind_address, "Failed to bind signaling server");
            format!("Failed to bind signaling server to {}: {e}", config.signaling_bind_address)
        })?;

    let ops_app = build_ops_routes(Arc::clone(&health_state), prometheus_handle);
    let health_shutdown_token = shutdown_token.clone();
    let health_addr = config.health_bind_address;
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, ops_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let signaling_app = build_routes(AppState {
        session: Arc::clone(&session),
        connection_settings: config.connection_settings(),
        health: Arc::clone(&health_state),
    });
    let signaling_shutdown_token = shutdown_token.clone();
    let signaling_addr = config.signaling_bind_address;
    tokio::spawn(async move {
        info!(addr = %signaling_addr, "Signaling server starting");
        let server = axum::serve(signaling_listener, signaling_app).with_graceful_shutdown(
            async move {
                signaling_shutdown_token.cancelled().await;
                info!("Signaling server shutting down");
            },
        );
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    health_state.set_ready();
    info!("Duet signaling running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    health_state.begin_draining();

    // Cancels every connection and both servers via child tokens
    session.shutdown(config.shutdown_grace()).await;

    info!("Duet signaling shutdown complete");
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.default_filter));
    let registry = tracing_subscriber::registry().with(filter);

    match observability.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
