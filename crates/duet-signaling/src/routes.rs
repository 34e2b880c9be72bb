//! HTTP routes for the signaling service.
//!
//! Two routers, served on separate listeners:
//! - signaling: `/ws` WebSocket upgrade
//! - operations: `/health`, `/ready`, `/metrics`

use crate::actors::{ConnectionActor, ConnectionSettings};
use crate::observability::{health_router, HealthState};
use crate::session::SessionManager;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Application state shared by the signaling handlers.
#[derive(Clone)]
pub struct AppState {
    /// Room and connection bookkeeping.
    pub session: Arc<SessionManager>,

    /// Transport settings for new connections.
    pub connection_settings: ConnectionSettings,

    /// Readiness gate for new upgrades.
    pub health: Arc<HealthState>,
}

/// Build the signaling router.
///
/// - `/ws` - WebSocket upgrade; 503 while the service is not ready
/// - TraceLayer for request logging
pub fn build_routes(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Build the operations router: probes plus Prometheus exposition.
pub fn build_ops_routes(health: Arc<HealthState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    health_router(health).merge(metrics_routes)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if !state.health.accepts_connections() || state.session.is_shutting_down() {
        debug!(
            target: "duet.connection",
            phase = state.health.readiness().as_str(),
            "Upgrade refused"
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let settings = state.connection_settings;
    // Frames above this bound close the socket; frames between the two
    // bounds are dropped and counted by the connection actor.
    let hard_limit = settings.max_frame_bytes.saturating_mul(4);

    ws.max_message_size(hard_limit)
        .max_frame_size(hard_limit)
        .on_upgrade(move |socket| {
            ConnectionActor::from_socket(socket, state.session, settings).run()
        })
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
