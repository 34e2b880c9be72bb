//! Mailbox monitoring and session counters.
//!
//! Connection mailboxes are bounded by `DUET_MAILBOX_CAPACITY`; the alert
//! levels scale with that bound:
//!
//! | Level    | Depth                     |
//! |----------|---------------------------|
//! | Normal   | <= capacity / 2           |
//! | Warning  | <= capacity * 3 / 4       |
//! | Critical | above that                |

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Tracks queue depth of one connection mailbox.
///
/// The producer side (relays) records enqueues and drops; the connection
/// actor records dequeues as it drains frames to the socket.
#[derive(Debug)]
pub struct MailboxMonitor {
    connection_id: String,
    capacity: usize,
    normal_threshold: usize,
    warning_threshold: usize,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    /// Create a monitor for a mailbox of the given capacity.
    #[must_use]
    pub fn new(connection_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            connection_id: connection_id.into(),
            capacity,
            normal_threshold: capacity / 2,
            warning_threshold: capacity.saturating_mul(3) / 4,
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    ///
    /// Called before the send is attempted; a failed send is undone with
    /// [`Self::cancel_enqueue`].
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        prom::mailbox_depth_increment();
        // A send into a full mailbox is counted here before it fails.
        self.peak_depth
            .fetch_max(new_depth.min(self.capacity), Ordering::Relaxed);

        match self.level_for_depth(new_depth) {
            MailboxLevel::Critical => {
                warn!(
                    target: "duet.connection.mailbox",
                    connection_id = %self.connection_id,
                    depth = new_depth,
                    threshold = self.warning_threshold,
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning if new_depth == self.normal_threshold + 1 => {
                // Log once when crossing into warning
                debug!(
                    target: "duet.connection.mailbox",
                    connection_id = %self.connection_id,
                    depth = new_depth,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// Undo an enqueue whose send failed.
    pub fn cancel_enqueue(&self) {
        self.release(1);
    }

    /// Record a message being drained to the socket.
    pub fn record_dequeue(&self) {
        self.release(1);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Release whatever is still counted as queued. Called when the mailbox
    /// is dropped with events in it.
    pub fn record_discarded(&self) {
        let remaining = self.depth.swap(0, Ordering::Relaxed);
        if remaining > 0 {
            prom::mailbox_depth_decrement(remaining);
        }
    }

    /// Lower the depth by up to `count`, keeping the gauge in step.
    fn release(&self, count: usize) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(count))
            })
            .unwrap_or_else(|d| d);
        let released = previous.min(count);
        if released > 0 {
            prom::mailbox_depth_decrement(released);
        }
    }

    /// Record a message dropped because the mailbox was full or closed.
    pub fn record_drop(&self, reason: &'static str) {
        let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            target: "duet.connection.mailbox",
            connection_id = %self.connection_id,
            reason,
            dropped,
            "Message dropped due to backpressure"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.warning_threshold {
            MailboxLevel::Critical
        } else if depth > self.normal_threshold {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Service-wide counters.
///
/// Shared between the session manager (which updates values) and the status
/// snapshot. Gauge updates are mirrored to Prometheus.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    active_connections: AtomicUsize,
    active_rooms: AtomicUsize,
    joins: AtomicU64,
    rejected_joins: AtomicU64,
    messages_relayed: AtomicU64,
    messages_dropped: AtomicU64,
    frames_rejected: AtomicU64,
}

/// Point-in-time copy of [`SessionMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMetricsSnapshot {
    pub connections: usize,
    pub rooms: usize,
    pub joins: u64,
    pub rejected_joins: u64,
    pub messages_relayed: u64,
    pub messages_dropped: u64,
    pub frames_rejected: u64,
}

impl SessionMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_opened(&self) {
        let count = self.active_connections.fetch_add(1, Ordering::SeqCst) + 1;
        prom::set_connections_active(count);
    }

    pub fn connection_closed(&self) {
        let count = self
            .active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                Some(c.saturating_sub(1))
            })
            .map_or(0, |prev| prev.saturating_sub(1));
        prom::set_connections_active(count);
    }

    /// Publish the current room count read from the room table.
    pub fn set_rooms(&self, count: usize) {
        self.active_rooms.store(count, Ordering::SeqCst);
        prom::set_rooms_active(count);
    }

    /// Record an accepted join and the position it was assigned.
    pub fn record_join(&self, outcome: &'static str) {
        self.joins.fetch_add(1, Ordering::Relaxed);
        prom::record_join(outcome);
    }

    /// Record a join refused for capacity or validation.
    pub fn record_rejected_join(&self, outcome: &'static str) {
        self.rejected_joins.fetch_add(1, Ordering::Relaxed);
        prom::record_join(outcome);
    }

    pub fn record_relayed(&self, event: &'static str) {
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
        prom::record_message_relayed(event);
    }

    pub fn record_dropped(&self, reason: &'static str) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
        prom::record_message_dropped(reason);
    }

    pub fn record_frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
        prom::record_frame_rejected();
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionMetricsSnapshot {
        SessionMetricsSnapshot {
            connections: self.active_connections.load(Ordering::SeqCst),
            rooms: self.active_rooms.load(Ordering::SeqCst),
            joins: self.joins.load(Ordering::Relaxed),
            rejected_joins: self.rejected_joins.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
        }
    }
}
