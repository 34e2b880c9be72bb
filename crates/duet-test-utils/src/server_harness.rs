//! Test server harness for end-to-end signaling tests.
//!
//! Provides `TestSignalingServer` for spawning the real signaling router in
//! tests.

use duet_signaling::config::Config;
use duet_signaling::observability::HealthState;
use duet_signaling::routes::{self, AppState};
use duet_signaling::session::SessionManager;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness running the signaling router on `127.0.0.1:0`.
///
/// # Example
/// ```rust,ignore
/// let server = TestSignalingServer::spawn().await?;
/// let client = TestClient::connect(&server.ws_url()).await?;
/// assert_eq!(server.session().status().connections, 1);
/// ```
pub struct TestSignalingServer {
    addr: SocketAddr,
    config: Config,
    session: Arc<SessionManager>,
    health: Arc<HealthState>,
    _handle: JoinHandle<()>,
}

impl TestSignalingServer {
    /// Spawn a server with default configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(HashMap::new()).await
    }

    /// Spawn a server with extra `DUET_*` variables (e.g. a small mailbox).
    ///
    /// The bind address variables are ignored; the server always binds a
    /// random loopback port.
    pub async fn spawn_with_vars(vars: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let session = Arc::new(SessionManager::new(config.mailbox_capacity));
        let health = Arc::new(HealthState::new());
        health.set_ready();

        let app = routes::build_routes(AppState {
            session: Arc::clone(&session),
            connection_settings: config.connection_settings(),
            health: Arc::clone(&health),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            session,
            health,
            _handle: handle,
        })
    }

    /// WebSocket URL of the signaling endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The live session manager, for asserting on server-side state.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    /// Poll until `condition` holds or the timeout elapses.
    ///
    /// Server-side effects of a client frame land asynchronously; use this
    /// instead of sleeping.
    pub async fn wait_until<F>(&self, condition: F) -> Result<(), anyhow::Error>
    where
        F: Fn(&SessionManager) -> bool,
    {
        tokio::time::timeout(crate::client::RECV_TIMEOUT, async {
            while !condition(&self.session) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("condition not reached within {:?}", crate::client::RECV_TIMEOUT))
    }
}

impl Drop for TestSignalingServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
