//! Observability for the signaling service.
//!
//! Instrumentation never records payload bodies, only event names and byte
//! lengths. Metric labels are bounded by code:
//! - `event`: wire event names
//! - `outcome`: join outcomes
//! - `reason`: delivery failure reasons
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `duet_connections_active` | Gauge | none | Live WebSocket connections |
//! | `duet_rooms_active` | Gauge | none | Rooms in the room table |
//! | `duet_mailbox_depth` | Gauge | none | Events queued in outbound mailboxes, all connections |
//! | `duet_joins_total` | Counter | `outcome` | Join attempts |
//! | `duet_messages_relayed_total` | Counter | `event` | Deliveries into a peer mailbox |
//! | `duet_messages_dropped_total` | Counter | `reason` | Failed deliveries |
//! | `duet_frames_rejected_total` | Counter | none | Oversized, binary or malformed frames |
//! | `duet_relay_latency_seconds` | Histogram | `event` | Inbound event dispatch time |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState, Readiness};
pub use metrics::init_metrics_recorder;
