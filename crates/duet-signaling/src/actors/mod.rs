//! Per-connection actors.
//!
//! ```text
//! SessionManager (one per process)
//! └── ConnectionActor (one per WebSocket)
//!     ├── reads frames -> SessionManager::handle_text
//!     └── drains Mailbox -> socket
//! ```
//!
//! - **Bounded mailboxes**: relays push with `try_send`; a slow peer loses
//!   messages rather than stalling the sender
//! - **CancellationToken propagation**: every connection token is a child of
//!   the session manager's root token
//!
//! # Modules
//!
//! - [`connection`] - `ConnectionActor`, its handle and mailbox
//! - [`metrics`] - Mailbox monitoring and session counters

pub mod connection;
pub mod metrics;

pub use connection::{ConnectionActor, ConnectionHandle, ConnectionSettings, Mailbox};
pub use metrics::{MailboxLevel, MailboxMonitor, SessionMetrics, SessionMetricsSnapshot};
