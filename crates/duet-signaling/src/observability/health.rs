//! Probe endpoints and the readiness phase of the signaling service.
//!
//! - `GET /health` - 200 while the process runs
//! - `GET /ready` - 200 only in the `ready` phase; the body names the phase
//!
//! `/metrics` is merged onto the same listener in `main` and rendered by
//! `metrics-exporter-prometheus`.
//!
//! # Phases
//!
//! ```text
//! starting --set_ready--> ready --begin_draining--> draining
//! ```
//!
//! The signaling listener is bound during `starting`. Once shutdown begins
//! the service is `draining` for good: `/ready` reports 503 so load
//! balancers stop routing here, and `/ws` refuses new upgrades while the
//! existing rooms are given the grace period to close.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::info;

/// Where the service is in its accept lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Listeners bound, not yet accepting signaling connections.
    Starting,
    /// Accepting new connections.
    Ready,
    /// Shutting down; existing connections are being closed.
    Draining,
}

impl Readiness {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Readiness::Starting => "starting",
            Readiness::Ready => "ready",
            Readiness::Draining => "draining",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Readiness::Ready,
            2 => Readiness::Draining,
            _ => Readiness::Starting,
        }
    }
}

/// Liveness flag and readiness phase, shared by the probe router and the
/// `/ws` upgrade gate.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    phase: AtomicU8,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Live, in the `starting` phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            phase: AtomicU8::new(Readiness::Starting as u8),
        }
    }

    /// Start accepting connections. Ignored once draining has begun.
    pub fn set_ready(&self) {
        let _ = self.phase.compare_exchange(
            Readiness::Starting as u8,
            Readiness::Ready as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Stop accepting connections for the rest of the process lifetime.
    pub fn begin_draining(&self) {
        let previous =
            Readiness::from_u8(self.phase.swap(Readiness::Draining as u8, Ordering::SeqCst));
        if previous != Readiness::Draining {
            info!(
                target: "duet.health",
                from = previous.as_str(),
                "Draining, new connections refused"
            );
        }
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        Readiness::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Whether `/ws` should accept a new upgrade.
    #[must_use]
    pub fn accepts_connections(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Create the probe router.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    let phase = state.readiness();
    let status = if phase == Readiness::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, phase.as_str())
}
