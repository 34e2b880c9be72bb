//! Prometheus metrics for the signaling service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `duet_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label value comes from a closed set in code:
//! - `event`: wire event names (8 values)
//! - `outcome`: join outcomes (4 values)
//! - `reason`: drop reasons (`mailbox_full`, `mailbox_closed`)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// the `/metrics` endpoint.
///
/// Must be called before any metric is recorded. Relay latency buckets are
/// sub-millisecond heavy since relaying is an in-memory hop.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("duet_relay".to_string()),
            &[
                0.000_05, 0.000_1, 0.000_25, 0.000_5, 0.001, 0.005, 0.010, 0.050, 0.100,
            ],
        )
        .map_err(|e| format!("Failed to set relay latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of live connections.
///
/// Metric: `duet_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("duet_connections_active").set(count as f64);
}

/// Set the number of rooms in the room table.
///
/// Metric: `duet_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("duet_rooms_active").set(count as f64);
}

/// Count one event queued in a connection mailbox.
///
/// Metric: `duet_mailbox_depth` (events queued across all connections)
pub fn mailbox_depth_increment() {
    gauge!("duet_mailbox_depth").increment(1.0);
}

/// Count `count` events leaving connection mailboxes.
///
/// Metric: `duet_mailbox_depth`
pub fn mailbox_depth_decrement(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("duet_mailbox_depth").decrement(count as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Record a join attempt.
///
/// Metric: `duet_joins_total`
/// Labels: `outcome` (initiator, responder, room_full, rejected)
pub fn record_join(outcome: &'static str) {
    counter!("duet_joins_total", "outcome" => outcome).increment(1);
}

/// Record a message delivered to a peer mailbox.
///
/// Metric: `duet_messages_relayed_total`
/// Labels: `event`
pub fn record_message_relayed(event: &'static str) {
    counter!("duet_messages_relayed_total", "event" => event).increment(1);
}

/// Record a message dropped on delivery.
///
/// Metric: `duet_messages_dropped_total`
/// Labels: `reason`
pub fn record_message_dropped(reason: &'static str) {
    counter!("duet_messages_dropped_total", "reason" => reason).increment(1);
}

/// Record an inbound frame rejected before dispatch (oversized, binary,
/// malformed).
///
/// Metric: `duet_frames_rejected_total`
pub fn record_frame_rejected() {
    counter!("duet_frames_rejected_total").increment(1);
}

// ============================================================================
// Histograms
// ============================================================================

/// Record the time spent relaying one inbound event.
///
/// Metric: `duet_relay_latency_seconds`
/// Labels: `event`
pub fn record_relay_latency(event: &'static str, duration: Duration) {
    histogram!("duet_relay_latency_seconds", "event" => event).record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder the macros hit the global no-op recorder,
    // which is enough to exercise every function.

    #[test]
    fn test_gauges() {
        set_connections_active(0);
        set_connections_active(10_000);
        set_rooms_active(0);
        set_rooms_active(5_000);
        mailbox_depth_increment();
        mailbox_depth_decrement(1);
    }

    #[test]
    fn test_counters() {
        record_join("initiator");
        record_join("responder");
        record_join("room_full");
        record_join("rejected");
        record_message_relayed("offer");
        record_message_dropped("mailbox_full");
        record_frame_rejected();
    }

    #[test]
    fn test_histograms() {
        record_relay_latency("ice-candidate", Duration::from_micros(80));
    }

    #[test]
    fn test_metrics_are_captured_by_recorder() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_connections_active(2);
            set_rooms_active(1);
            record_join("initiator");
            record_message_relayed("answer");
            record_relay_latency("answer", Duration::from_micros(120));
        });

        let metrics = snapshotter.snapshot().into_vec();
        assert!(
            metrics.len() >= 5,
            "expected at least 5 recorded metrics, got {}",
            metrics.len()
        );
    }
}
