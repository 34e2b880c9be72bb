//! Handshake relay: `offer`, `answer`, `ice-candidate` and `ready`.
//!
//! Bodies are forwarded verbatim and in arrival order. Protocol ordering
//! (offer before answer) is left to the peers.

use super::Fanout;
use crate::errors::SignalingError;
use crate::protocol::{AnswerPayload, CandidatePayload, OfferPayload, OutboundEvent};
use common::types::ConnectionId;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HandshakeRelay {
    fanout: Fanout,
}

impl HandshakeRelay {
    #[must_use]
    pub fn new(fanout: Fanout) -> Self {
        Self { fanout }
    }

    /// Forward an SDP offer to the sender's peer.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom` or `NotMember` if the sender is not in the room.
    pub fn relay_offer(
        &self,
        sender: &ConnectionId,
        payload: OfferPayload,
    ) -> Result<usize, SignalingError> {
        debug!(target: "duet.relay", connection_id = %sender, body_len = payload.offer.get().len(), "Offer");
        self.fanout
            .to_peers(&payload.room_id, sender, OutboundEvent::Offer(payload.offer))
    }

    /// Forward an SDP answer to the sender's peer.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom` or `NotMember` if the sender is not in the room.
    pub fn relay_answer(
        &self,
        sender: &ConnectionId,
        payload: AnswerPayload,
    ) -> Result<usize, SignalingError> {
        debug!(target: "duet.relay", connection_id = %sender, body_len = payload.answer.get().len(), "Answer");
        self.fanout
            .to_peers(&payload.room_id, sender, OutboundEvent::Answer(payload.answer))
    }

    /// Forward an ICE candidate to the sender's peer.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom` or `NotMember` if the sender is not in the room.
    pub fn relay_ice_candidate(
        &self,
        sender: &ConnectionId,
        payload: CandidatePayload,
    ) -> Result<usize, SignalingError> {
        self.fanout.to_peers(
            &payload.room_id,
            sender,
            OutboundEvent::IceCandidate(payload.candidate),
        )
    }

    /// Tell the initiator its peer has arrived.
    pub fn notify_ready(&self, initiator: &ConnectionId) -> bool {
        self.fanout.deliver(initiator, OutboundEvent::Ready)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{ConnectionHandle, Mailbox, SessionMetrics};
    use crate::registry::ConnectionRegistry;
    use crate::rooms::RoomTable;
    use common::types::RoomId;
    use serde_json::value::RawValue;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        relay: HandshakeRelay,
        rooms: Arc<RoomTable>,
        registry: Arc<ConnectionRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let rooms = Arc::new(RoomTable::new());
            let fanout = Fanout::new(
                Arc::clone(&registry),
                Arc::clone(&rooms),
                SessionMetrics::new(),
            );
            Self {
                relay: HandshakeRelay::new(fanout),
                rooms,
                registry,
            }
        }

        fn member(&self, room: &str) -> (ConnectionId, Mailbox) {
            let (handle, mailbox) =
                ConnectionHandle::new(ConnectionId::new(), 8, CancellationToken::new());
            let id = handle.id().clone();
            self.registry.register(handle);
            self.rooms.join(&RoomId::from(room), &id);
            (id, mailbox)
        }
    }

    fn raw(text: &str) -> Box<RawValue> {
        RawValue::from_string(text.to_string()).unwrap()
    }

    #[test]
    fn test_offer_reaches_peer_only() {
        let fx = Fixture::new();
        let (c1, mut m1) = fx.member("room42");
        let (_c2, mut m2) = fx.member("room42");

        let body = r#"{"type":"offer","sdp":"v=0"}"#;
        let delivered = fx
            .relay
            .relay_offer(
                &c1,
                OfferPayload {
                    room_id: RoomId::from("room42"),
                    offer: raw(body),
                },
            )
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(matches!(m2.try_recv(), Some(OutboundEvent::Offer(b)) if b.get() == body));
        assert!(m1.try_recv().is_none());
    }

    #[test]
    fn test_candidates_keep_arrival_order() {
        let fx = Fixture::new();
        let (c1, _m1) = fx.member("r");
        let (_c2, mut m2) = fx.member("r");

        for i in 0..3 {
            fx.relay
                .relay_ice_candidate(
                    &c1,
                    CandidatePayload {
                        room_id: RoomId::from("r"),
                        candidate: raw(&format!("{{\"n\":{i}}}")),
                    },
                )
                .unwrap();
        }

        for i in 0..3 {
            let expected = format!("{{\"n\":{i}}}");
            assert!(matches!(m2.try_recv(), Some(OutboundEvent::IceCandidate(b)) if b.get() == expected));
        }
    }

    #[test]
    fn test_answer_from_non_member_is_dropped() {
        let fx = Fixture::new();
        let (_c1, mut m1) = fx.member("room-a");
        let (outsider, _m) = fx.member("room-b");

        let result = fx.relay.relay_answer(
            &outsider,
            AnswerPayload {
                room_id: RoomId::from("room-a"),
                answer: raw("{}"),
            },
        );

        assert!(matches!(result, Err(SignalingError::NotMember(_))));
        assert!(m1.try_recv().is_none());
    }

    #[test]
    fn test_offer_alone_in_room_delivers_nothing() {
        let fx = Fixture::new();
        let (c1, _m1) = fx.member("solo");

        let delivered = fx
            .relay
            .relay_offer(
                &c1,
                OfferPayload {
                    room_id: RoomId::from("solo"),
                    offer: raw("{}"),
                },
            )
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_notify_ready() {
        let fx = Fixture::new();
        let (c1, mut m1) = fx.member("r");

        assert!(fx.relay.notify_ready(&c1));
        assert!(matches!(m1.try_recv(), Some(OutboundEvent::Ready)));
        assert!(!fx.relay.notify_ready(&ConnectionId::from("gone")));
    }
}
