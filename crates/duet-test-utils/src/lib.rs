//! # Duet Test Utilities
//!
//! Shared test utilities for the Duet signaling service.
//!
//! ## Modules
//!
//! - `server_harness` - `TestSignalingServer`, a real router on a random port
//! - `client` - `TestClient`, a WebSocket client speaking the JSON envelope
//! - `fixtures` - Frame builders and sample payloads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use duet_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestSignalingServer::spawn().await?;
//!     let room = TestRoom::random();
//!
//!     let mut alice = TestClient::connect(&server.ws_url()).await?;
//!     let mut bob = TestClient::connect(&server.ws_url()).await?;
//!
//!     alice.send_raw(&room.join_frame()).await?;
//!     alice.expect_silence().await?;
//!     bob.send_raw(&room.join_frame()).await?;
//!
//!     assert_eq!(alice.recv_event().await?["event"], "ready");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod fixtures;
pub mod server_harness;

pub use client::{TestClient, RECV_TIMEOUT, SILENCE_WINDOW};
pub use fixtures::*;
pub use server_harness::TestSignalingServer;
