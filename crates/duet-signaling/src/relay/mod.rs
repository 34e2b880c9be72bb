//! Room-scoped relays.
//!
//! Both relays forward an outbound event to every member of the sender's room
//! except the sender. Delivery is a non-blocking push into each peer's
//! mailbox; a failed push is logged and counted and never reported back to
//! the sender.

pub mod application;
pub mod handshake;

pub use application::ApplicationRelay;
pub use handshake::HandshakeRelay;

use crate::actors::SessionMetrics;
use crate::errors::SignalingError;
use crate::protocol::OutboundEvent;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomTable;
use common::types::{ConnectionId, RoomId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared fan-out used by both relays.
#[derive(Debug, Clone)]
pub struct Fanout {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomTable>,
    metrics: Arc<SessionMetrics>,
}

impl Fanout {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomTable>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            registry,
            rooms,
            metrics,
        }
    }

    #[must_use]
    pub fn rooms(&self) -> &RoomTable {
        &self.rooms
    }

    /// Forward `event` to the sender's peers. Returns how many mailboxes
    /// accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`SignalingError::UnknownRoom`] or [`SignalingError::NotMember`]
    /// when the sender is not in `room_id`; nothing is delivered then.
    pub fn to_peers(
        &self,
        room_id: &RoomId,
        sender: &ConnectionId,
        event: OutboundEvent,
    ) -> Result<usize, SignalingError> {
        let peers = self.rooms.peers(room_id, sender)?;
        let mut delivered = 0;
        for peer in &peers {
            if self.deliver(peer, event.clone()) {
                delivered += 1;
            }
        }

        debug!(
            target: "duet.relay",
            room_id = %room_id,
            connection_id = %sender,
            event = event.name(),
            peers = peers.len(),
            delivered,
            "Relayed"
        );
        Ok(delivered)
    }

    /// Push one event into one mailbox, counting the result.
    pub fn deliver(&self, target: &ConnectionId, event: OutboundEvent) -> bool {
        let name = event.name();
        match self.registry.deliver(target, event) {
            Ok(()) => {
                self.metrics.record_relayed(name);
                true
            }
            Err(SignalingError::DeliveryFailed { reason }) => {
                warn!(
                    target: "duet.relay",
                    connection_id = %target,
                    event = name,
                    reason = reason.as_str(),
                    "Delivery failed, message dropped"
                );
                self.metrics.record_dropped(reason.as_str());
                false
            }
            Err(e) => {
                // Peer disconnected between membership lookup and delivery.
                debug!(
                    target: "duet.relay",
                    connection_id = %target,
                    event = name,
                    error = %e,
                    "Delivery skipped"
                );
                false
            }
        }
    }
}
