//! Duet signaling service library.
//!
//! Pairs exactly two WebSocket clients into a room, relays the WebRTC
//! handshake (offer, answer, ICE candidates) between them and forwards a
//! small set of in-session application messages (chat, game selection and
//! moves). Media never passes through this service.
//!
//! # Architecture
//!
//! ```text
//! SessionManager
//! ├── ConnectionRegistry   connection id -> mailbox, state, room
//! ├── RoomTable            room id -> [initiator, responder]
//! ├── HandshakeRelay       offer / answer / ice-candidate / ready
//! └── ApplicationRelay     chat-message / game-select / game-move
//!
//! ConnectionActor (one per WebSocket) feeds frames into the SessionManager
//! and drains its own mailbox to the socket.
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Connection actor, mailboxes and counters
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types
//! - [`protocol`] - JSON wire envelope and typed events
//! - [`registry`] - Connection registry
//! - [`rooms`] - Room table
//! - [`relay`] - Handshake and application relays
//! - [`session`] - Lifecycle manager
//! - [`routes`] - HTTP and WebSocket routes
//! - [`observability`] - Health probes and Prometheus metrics

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actors;
pub mod config;
pub mod errors;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod rooms;
pub mod routes;
pub mod session;
