//! Session lifecycle manager.
//!
//! Owns the connection registry and room table and drives every state
//! change: connect, join, disconnect and inbound event dispatch. All
//! operations are synchronous; none holds a table lock across an await.
//!
//! # Join rules
//!
//! - Blank room identifiers are rejected locally.
//! - A connection already in another room is rejected locally.
//! - The first member becomes the initiator and hears nothing yet.
//! - The second member completes the pair; `ready` goes to the initiator only.
//! - A third join gets `room-full` and changes nothing.

use crate::actors::{ConnectionHandle, Mailbox, SessionMetrics, SessionMetricsSnapshot};
use crate::errors::SignalingError;
use crate::observability::metrics as prom;
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::registry::{ConnectionRegistry, ConnectionState};
use crate::relay::{ApplicationRelay, Fanout, HandshakeRelay};
use crate::rooms::{JoinOutcome, LeaveOutcome, Position, RoomSnapshot, RoomTable, ROOM_CAPACITY};
use common::types::{ConnectionId, RoomId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Poll interval while waiting for connections to drain on shutdown.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Coordinates rooms, connections and relays.
#[derive(Debug)]
pub struct SessionManager {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomTable>,
    fanout: Fanout,
    handshake: HandshakeRelay,
    application: ApplicationRelay,
    metrics: Arc<SessionMetrics>,
    mailbox_capacity: usize,
    cancel_token: CancellationToken,
}

impl SessionManager {
    /// Create a manager whose connections get mailboxes of `mailbox_capacity`.
    #[must_use]
    pub fn new(mailbox_capacity: usize) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomTable::new());
        let metrics = SessionMetrics::new();
        let fanout = Fanout::new(
            Arc::clone(&registry),
            Arc::clone(&rooms),
            Arc::clone(&metrics),
        );

        Self {
            handshake: HandshakeRelay::new(fanout.clone()),
            application: ApplicationRelay::new(fanout.clone()),
            fanout,
            registry,
            rooms,
            metrics,
            mailbox_capacity: mailbox_capacity.max(1),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Register a new connection.
    ///
    /// The handle's cancellation token is a child of the manager's, so
    /// [`SessionManager::shutdown`] reaches every connection task.
    pub fn connect(&self) -> (ConnectionHandle, Mailbox) {
        let (handle, mailbox) = ConnectionHandle::new(
            ConnectionId::new(),
            self.mailbox_capacity,
            self.cancel_token.child_token(),
        );
        self.registry.register(handle.clone());
        self.metrics.connection_opened();

        info!(
            target: "duet.session",
            connection_id = %handle.id(),
            connections = self.metrics.connection_count(),
            "Connection opened"
        );
        (handle, mailbox)
    }

    /// Place a connection into a room.
    ///
    /// # Errors
    ///
    /// - `InvalidRoomId` for a blank identifier
    /// - `UnknownConnection` if the connection already disconnected
    /// - `AlreadyInRoom` if it is a member of a different room
    /// - `CapacityExceeded` if the room is full; `room-full` has been sent
    #[instrument(skip_all, name = "duet.session.join", fields(connection_id = %connection_id, room_id = %room_id))]
    pub fn join_room(
        &self,
        connection_id: &ConnectionId,
        room_id: RoomId,
    ) -> Result<JoinOutcome, SignalingError> {
        if !room_id.is_well_formed() {
            self.metrics.record_rejected_join("rejected");
            return Err(SignalingError::InvalidRoomId);
        }

        if !self.registry.contains(connection_id) {
            return Err(SignalingError::UnknownConnection(connection_id.to_string()));
        }

        if let Some(current) = self
            .registry
            .lookup(connection_id)
            .filter(|current| *current != room_id)
        {
            self.metrics.record_rejected_join("rejected");
            return Err(SignalingError::AlreadyInRoom(current));
        }

        let outcome = self.rooms.join(&room_id, connection_id);
        match &outcome {
            JoinOutcome::Accepted { position, members } => {
                if let Err(e) =
                    self.registry
                        .set_room(connection_id, room_id.clone(), ConnectionState::Joining)
                {
                    // Disconnected mid-join: undo the membership.
                    self.rooms.leave(&room_id, connection_id);
                    self.metrics.set_rooms(self.rooms.len());
                    return Err(e);
                }
                self.sync_member_states(&room_id);

                if *position == Position::Responder {
                    if let Some(initiator) = members.first() {
                        self.handshake.notify_ready(initiator);
                    }
                }

                self.metrics.record_join(position.as_str());
                self.metrics.set_rooms(self.rooms.len());
                info!(
                    target: "duet.session",
                    connection_id = %connection_id,
                    room_id = %room_id,
                    position = position.as_str(),
                    "Joined room"
                );
            }
            JoinOutcome::AlreadyMember { position } => {
                debug!(
                    target: "duet.session",
                    connection_id = %connection_id,
                    room_id = %room_id,
                    position = position.as_str(),
                    "Duplicate join ignored"
                );
            }
            JoinOutcome::CapacityExceeded => {
                self.metrics.record_rejected_join("room_full");
                self.fanout.deliver(connection_id, OutboundEvent::RoomFull);
                return Err(SignalingError::CapacityExceeded(room_id));
            }
        }

        Ok(outcome)
    }

    /// Remove a connection and clean up its room.
    ///
    /// Returns `false` if the connection was already removed, so duplicate
    /// close signals are harmless.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        let Some(entry) = self.registry.unregister(connection_id) else {
            return false;
        };
        entry.handle.cancel();
        self.metrics.connection_closed();

        if let Some(room_id) = entry.room {
            match self.rooms.leave(&room_id, connection_id) {
                LeaveOutcome::Left { .. } => self.sync_member_states(&room_id),
                LeaveOutcome::RoomDeleted => {}
                LeaveOutcome::NotMember => {
                    warn!(
                        target: "duet.session",
                        connection_id = %connection_id,
                        room_id = %room_id,
                        "Room reference without membership"
                    );
                }
            }
            self.metrics.set_rooms(self.rooms.len());
        }

        info!(
            target: "duet.session",
            connection_id = %connection_id,
            connections = self.metrics.connection_count(),
            "Connection closed"
        );
        true
    }

    /// Derive every member's state from the room's current membership.
    ///
    /// Runs under the room lock and after every membership change, so the
    /// latest change decides between `Paired` and `Joining`.
    fn sync_member_states(&self, room_id: &RoomId) {
        self.rooms.with_members(room_id, |members| {
            let state = if members.len() == ROOM_CAPACITY {
                ConnectionState::Paired
            } else {
                ConnectionState::Joining
            };
            for member in members {
                self.registry.set_state(member, state);
            }
        });
    }

    /// Dispatch one decoded inbound event.
    ///
    /// # Errors
    ///
    /// Returns the join or relay error; callers log it and carry on.
    pub fn handle_event(
        &self,
        connection_id: &ConnectionId,
        event: InboundEvent,
    ) -> Result<(), SignalingError> {
        let started = Instant::now();
        let name = event.name();

        let result = match event {
            InboundEvent::JoinRoom(p) => self.join_room(connection_id, p.room_id).map(drop),
            InboundEvent::Offer(p) => self.handshake.relay_offer(connection_id, p).map(drop),
            InboundEvent::Answer(p) => self.handshake.relay_answer(connection_id, p).map(drop),
            InboundEvent::IceCandidate(p) => self
                .handshake
                .relay_ice_candidate(connection_id, p)
                .map(drop),
            InboundEvent::ChatMessage(p) => self
                .application
                .broadcast_to_room(
                    &p.room_id,
                    connection_id,
                    OutboundEvent::ChatMessage {
                        message: p.message,
                        sender: p.sender,
                    },
                )
                .map(drop),
            InboundEvent::GameSelect(p) => self
                .application
                .broadcast_to_room(
                    &p.room_id,
                    connection_id,
                    OutboundEvent::GameSelect {
                        game_type: p.game_type,
                    },
                )
                .map(drop),
            InboundEvent::GameMove(p) => self
                .application
                .broadcast_to_room(
                    &p.room_id,
                    connection_id,
                    OutboundEvent::GameMove {
                        game_type: p.game_type,
                        move_data: p.move_data,
                    },
                )
                .map(drop),
        };

        prom::record_relay_latency(name, started.elapsed());
        result
    }

    /// Decode and dispatch a text frame. Failures are logged, never returned.
    pub fn handle_text(&self, connection_id: &ConnectionId, frame: &str) {
        let event = match InboundEvent::parse(frame) {
            Ok(event) => event,
            Err(e) => {
                self.reject_frame(connection_id, "malformed", frame.len());
                debug!(target: "duet.session", connection_id = %connection_id, error = %e, "Parse failure");
                return;
            }
        };

        let name = event.name();
        if let Err(e) = self.handle_event(connection_id, event) {
            if e.is_client_visible() {
                info!(target: "duet.session", connection_id = %connection_id, event = name, error = %e, "Event rejected");
            } else {
                debug!(target: "duet.session", connection_id = %connection_id, event = name, error = %e, "Event dropped");
            }
        }
    }

    /// Count and log a frame dropped before dispatch.
    pub fn reject_frame(&self, connection_id: &ConnectionId, reason: &'static str, len: usize) {
        self.metrics.record_frame_rejected();
        debug!(
            target: "duet.session",
            connection_id = %connection_id,
            reason,
            frame_len = len,
            "Frame dropped"
        );
    }

    #[must_use]
    pub fn connection_state(&self, connection_id: &ConnectionId) -> ConnectionState {
        self.registry.state(connection_id)
    }

    #[must_use]
    pub fn connection_room(&self, connection_id: &ConnectionId) -> Option<RoomId> {
        self.registry.lookup(connection_id)
    }

    #[must_use]
    pub fn room_snapshot(&self, room_id: &RoomId) -> Option<RoomSnapshot> {
        self.rooms.snapshot(room_id)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn status(&self) -> SessionMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Token for tasks that should stop with the manager.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Cancel every connection and wait up to `grace` for them to unregister.
    ///
    /// Returns `true` if all connections closed in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!(
            target: "duet.session",
            connections = self.registry.len(),
            rooms = self.rooms.len(),
            "Initiating graceful shutdown"
        );
        self.cancel_token.cancel();
        self.registry.cancel_all();

        let drained = tokio::time::timeout(grace, async {
            while !self.registry.is_empty() {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if drained {
            info!(target: "duet.session", "All connections closed");
        } else {
            warn!(
                target: "duet.session",
                remaining = self.registry.len(),
                "Grace period elapsed with connections still open"
            );
        }
        drained
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn room42() -> RoomId {
        RoomId::from("room42")
    }

    #[test]
    fn test_room42_scenario() {
        let manager = SessionManager::new(8);
        let (c1, mut m1) = manager.connect();
        let (c2, mut m2) = manager.connect();
        let (c3, mut m3) = manager.connect();

        manager.join_room(c1.id(), room42()).unwrap();
        assert!(m1.try_recv().is_none(), "first member hears nothing");
        assert_eq!(manager.connection_state(c1.id()), ConnectionState::Joining);

        manager.join_room(c2.id(), room42()).unwrap();
        assert!(matches!(m1.try_recv(), Some(OutboundEvent::Ready)));
        assert!(m2.try_recv().is_none(), "responder gets no ready");
        assert_eq!(manager.connection_state(c1.id()), ConnectionState::Paired);
        assert_eq!(manager.connection_state(c2.id()), ConnectionState::Paired);

        let result = manager.join_room(c3.id(), room42());
        assert!(matches!(result, Err(SignalingError::CapacityExceeded(_))));
        assert!(matches!(m3.try_recv(), Some(OutboundEvent::RoomFull)));
        assert_eq!(manager.connection_room(c3.id()), None);
        assert_eq!(
            manager.room_snapshot(&room42()).unwrap().members,
            vec![c1.id().clone(), c2.id().clone()]
        );
    }

    #[test]
    fn test_join_racing_initiator_disconnect_leaves_responder_joining() {
        for _ in 0..2_000 {
            let manager = SessionManager::new(8);
            let (c1, _m1) = manager.connect();
            let (c2, _m2) = manager.connect();
            manager.join_room(c1.id(), room42()).unwrap();

            std::thread::scope(|s| {
                s.spawn(|| {
                    let _ = manager.join_room(c2.id(), room42());
                });
                s.spawn(|| {
                    manager.disconnect(c1.id());
                });
            });

            assert_eq!(
                manager.room_snapshot(&room42()).unwrap().members,
                vec![c2.id().clone()]
            );
            assert_eq!(manager.connection_state(c2.id()), ConnectionState::Joining);
        }
    }

    #[test]
    fn test_blank_room_id_rejected_without_state_change() {
        let manager = SessionManager::new(8);
        let (c1, mut m1) = manager.connect();

        let result = manager.join_room(c1.id(), RoomId::from("   "));
        assert!(matches!(result, Err(SignalingError::InvalidRoomId)));
        assert_eq!(manager.connection_state(c1.id()), ConnectionState::Connected);
        assert_eq!(manager.room_count(), 0);
        assert!(m1.try_recv().is_none());
    }

    #[test]
    fn test_join_second_room_rejected() {
        let manager = SessionManager::new(8);
        let (c1, _m1) = manager.connect();

        manager.join_room(c1.id(), RoomId::from("a")).unwrap();
        let result = manager.join_room(c1.id(), RoomId::from("b"));

        assert!(matches!(result, Err(SignalingError::AlreadyInRoom(r)) if r.as_str() == "a"));
        assert!(manager.room_snapshot(&RoomId::from("b")).is_none());
    }

    #[test]
    fn test_rejoin_same_room_is_noop() {
        let manager = SessionManager::new(8);
        let (c1, mut m1) = manager.connect();
        let (c2, _m2) = manager.connect();
        manager.join_room(c1.id(), room42()).unwrap();
        manager.join_room(c2.id(), room42()).unwrap();
        let _ready = m1.try_recv();

        let outcome = manager.join_room(c2.id(), room42()).unwrap();
        assert!(matches!(outcome, JoinOutcome::AlreadyMember { position: Position::Responder }));
        assert!(m1.try_recv().is_none(), "no second ready");
    }

    #[test]
    fn test_disconnect_cleans_up_rooms() {
        let manager = SessionManager::new(8);
        let (c1, _m1) = manager.connect();
        let (c2, _m2) = manager.connect();
        manager.join_room(c1.id(), room42()).unwrap();
        manager.join_room(c2.id(), room42()).unwrap();

        assert!(manager.disconnect(c1.id()));
        assert_eq!(
            manager.room_snapshot(&room42()).unwrap().members,
            vec![c2.id().clone()]
        );
        assert_eq!(manager.connection_state(c2.id()), ConnectionState::Joining);
        assert!(c1.is_cancelled());

        assert!(manager.disconnect(c2.id()));
        assert!(manager.room_snapshot(&room42()).is_none());
        assert_eq!(manager.room_count(), 0);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let manager = SessionManager::new(8);
        let (c1, _m1) = manager.connect();
        manager.join_room(c1.id(), room42()).unwrap();

        assert!(manager.disconnect(c1.id()));
        assert!(!manager.disconnect(c1.id()));
        assert_eq!(manager.status().connections, 0);
    }

    #[test]
    fn test_room_recreated_after_cleanup_starts_at_initiator() {
        let manager = SessionManager::new(8);
        let (c1, _m1) = manager.connect();
        manager.join_room(c1.id(), room42()).unwrap();
        manager.disconnect(c1.id());

        let (c2, _m2) = manager.connect();
        let outcome = manager.join_room(c2.id(), room42()).unwrap();
        assert!(matches!(
            outcome,
            JoinOutcome::Accepted {
                position: Position::Initiator,
                ..
            }
        ));
    }

    #[test]
    fn test_join_after_disconnect_is_rejected() {
        let manager = SessionManager::new(8);
        let (c1, _m1) = manager.connect();
        manager.disconnect(c1.id());

        let result = manager.join_room(c1.id(), room42());
        assert!(matches!(result, Err(SignalingError::UnknownConnection(_))));
        assert_eq!(manager.room_count(), 0);
    }

    #[test]
    fn test_handle_text_relays_offer_verbatim() {
        let manager = SessionManager::new(8);
        let (c1, mut m1) = manager.connect();
        let (c2, mut m2) = manager.connect();
        manager.join_room(c1.id(), room42()).unwrap();
        manager.join_room(c2.id(), room42()).unwrap();
        let _ready = m1.try_recv();

        let body = r#"{"type":"offer","sdp":"v=0\r\n"}"#;
        manager.handle_text(
            c1.id(),
            &format!(r#"{{"event":"offer","data":{{"roomId":"room42","offer":{body}}}}}"#),
        );

        assert!(matches!(m2.try_recv(), Some(OutboundEvent::Offer(b)) if b.get() == body));
        assert!(m1.try_recv().is_none());
    }

    #[test]
    fn test_handle_text_drops_malformed_frames() {
        let manager = SessionManager::new(8);
        let (c1, mut m1) = manager.connect();

        manager.handle_text(c1.id(), "{not json");
        manager.handle_text(c1.id(), r#"{"event":"teleport","data":{}}"#);

        assert!(m1.try_recv().is_none());
        assert_eq!(manager.status().frames_rejected, 2);
    }

    #[test]
    fn test_handle_event_game_select_records_label() {
        let manager = SessionManager::new(8);
        let (c1, _m1) = manager.connect();
        let (c2, mut m2) = manager.connect();
        manager.join_room(c1.id(), room42()).unwrap();
        manager.join_room(c2.id(), room42()).unwrap();

        manager.handle_text(
            c1.id(),
            r#"{"event":"game-select","data":{"roomId":"room42","gameType":"tictactoe"}}"#,
        );

        assert!(matches!(m2.try_recv(), Some(OutboundEvent::GameSelect { .. })));
        assert_eq!(
            manager.room_snapshot(&room42()).unwrap().game.as_deref(),
            Some("tictactoe")
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_connections() {
        let manager = SessionManager::new(8);
        let (c1, _m1) = manager.connect();
        let token = manager.child_token();

        // Nothing disconnects c1, so the drain times out.
        let drained = manager.shutdown(Duration::from_millis(100)).await;

        assert!(!drained);
        assert!(c1.is_cancelled());
        assert!(token.is_cancelled());
        assert!(manager.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_drains_when_connections_close() {
        let manager = Arc::new(SessionManager::new(8));
        let (c1, _m1) = manager.connect();

        let closer = Arc::clone(&manager);
        let handle = c1.clone();
        tokio::spawn(async move {
            handle.cancelled().await;
            closer.disconnect(handle.id());
        });

        assert!(manager.shutdown(Duration::from_secs(5)).await);
    }
}
