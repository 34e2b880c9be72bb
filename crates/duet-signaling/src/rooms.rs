//! Room table.
//!
//! Maps room identifiers to an ordered member list of at most two
//! connections. Every mutation of a room runs inside the map's entry lock for
//! that key, so joins and leaves on one room are serialized while unrelated
//! rooms proceed in parallel.
//!
//! Invariants:
//! - a room never lists more than [`ROOM_CAPACITY`] members
//! - a room with no members is never left in the table
//! - member order is join order; index 0 is the handshake initiator

use crate::errors::SignalingError;
use chrono::{DateTime, Utc};
use common::types::{ConnectionId, RoomId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Maximum members per room.
pub const ROOM_CAPACITY: usize = 2;

/// Slot a member occupies in its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Index 0: first to join, sends the offer once `ready` arrives.
    Initiator,
    /// Index 1: answers the initiator's offer.
    Responder,
}

impl Position {
    fn from_index(index: usize) -> Self {
        if index == 0 {
            Position::Initiator
        } else {
            Position::Responder
        }
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Position::Initiator => 0,
            Position::Responder => 1,
        }
    }

    /// Label for logs and the `duet_joins_total` metric.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Position::Initiator => "initiator",
            Position::Responder => "responder",
        }
    }
}

/// Result of [`RoomTable::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Added at `position`; `members` is the list after insertion.
    Accepted {
        position: Position,
        members: Vec<ConnectionId>,
    },
    /// Already listed; nothing changed.
    AlreadyMember { position: Position },
    /// Room is full; nothing changed.
    CapacityExceeded,
}

/// Result of [`RoomTable::leave`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Removed; other members remain.
    Left { remaining: Vec<ConnectionId> },
    /// Removed the last member; the room is gone.
    RoomDeleted,
    /// Room absent or connection not listed.
    NotMember,
}

/// Read-only copy of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub members: Vec<ConnectionId>,
    pub game: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Room {
    members: Vec<ConnectionId>,
    game: Option<String>,
    created_at: DateTime<Utc>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: Vec::with_capacity(ROOM_CAPACITY),
            game: None,
            created_at: Utc::now(),
        }
    }

    fn position_of(&self, connection_id: &ConnectionId) -> Option<Position> {
        self.members
            .iter()
            .position(|m| m == connection_id)
            .map(Position::from_index)
    }
}

/// Concurrent room table.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: DashMap<RoomId, Room>,
}

impl RoomTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, creating the room if absent.
    ///
    /// Creation and insertion happen under one entry lock: of two concurrent
    /// joins to a new room exactly one becomes the initiator.
    pub fn join(&self, room_id: &RoomId, connection_id: &ConnectionId) -> JoinOutcome {
        let mut room = self.rooms.entry(room_id.clone()).or_insert_with(Room::new);

        if let Some(position) = room.position_of(connection_id) {
            return JoinOutcome::AlreadyMember { position };
        }

        if room.members.len() >= ROOM_CAPACITY {
            debug!(
                target: "duet.rooms",
                room_id = %room_id,
                connection_id = %connection_id,
                "Join rejected, room full"
            );
            return JoinOutcome::CapacityExceeded;
        }

        let position = Position::from_index(room.members.len());
        room.members.push(connection_id.clone());

        debug!(
            target: "duet.rooms",
            room_id = %room_id,
            connection_id = %connection_id,
            position = position.as_str(),
            "Member joined"
        );

        JoinOutcome::Accepted {
            position,
            members: room.members.clone(),
        }
    }

    /// Remove a connection from a room, deleting the room when it empties.
    pub fn leave(&self, room_id: &RoomId, connection_id: &ConnectionId) -> LeaveOutcome {
        let Entry::Occupied(mut occupied) = self.rooms.entry(room_id.clone()) else {
            return LeaveOutcome::NotMember;
        };

        let room = occupied.get_mut();
        let before = room.members.len();
        room.members.retain(|m| m != connection_id);
        if room.members.len() == before {
            return LeaveOutcome::NotMember;
        }

        if room.members.is_empty() {
            occupied.remove();
            debug!(target: "duet.rooms", room_id = %room_id, "Room deleted");
            LeaveOutcome::RoomDeleted
        } else {
            debug!(
                target: "duet.rooms",
                room_id = %room_id,
                connection_id = %connection_id,
                "Member left"
            );
            LeaveOutcome::Left {
                remaining: room.members.clone(),
            }
        }
    }

    /// Members other than `sender`, in membership order.
    ///
    /// # Errors
    ///
    /// Returns [`SignalingError::UnknownRoom`] if the room does not exist, or
    /// [`SignalingError::NotMember`] if `sender` is not listed.
    pub fn peers(
        &self,
        room_id: &RoomId,
        sender: &ConnectionId,
    ) -> Result<Vec<ConnectionId>, SignalingError> {
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| SignalingError::UnknownRoom(room_id.clone()))?;

        if room.position_of(sender).is_none() {
            return Err(SignalingError::NotMember(room_id.clone()));
        }

        Ok(room.members.iter().filter(|m| *m != sender).cloned().collect())
    }

    #[must_use]
    pub fn members(&self, room_id: &RoomId) -> Option<Vec<ConnectionId>> {
        self.rooms.get(room_id).map(|room| room.members.clone())
    }

    /// Run `f` over the member list while holding the room's lock.
    ///
    /// Membership cannot change until `f` returns. Returns `None` if the room
    /// does not exist.
    pub fn with_members<R>(
        &self,
        room_id: &RoomId,
        f: impl FnOnce(&[ConnectionId]) -> R,
    ) -> Option<R> {
        self.rooms.get(room_id).map(|room| f(&room.members))
    }

    /// Record the room's game selection label.
    ///
    /// # Errors
    ///
    /// Returns [`SignalingError::UnknownRoom`] if the room does not exist.
    pub fn select_game(&self, room_id: &RoomId, label: String) -> Result<(), SignalingError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| SignalingError::UnknownRoom(room_id.clone()))?;
        room.game = Some(label);
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self, room_id: &RoomId) -> Option<RoomSnapshot> {
        self.rooms.get(room_id).map(|room| RoomSnapshot {
            room_id: room_id.clone(),
            members: room.members.clone(),
            game: room.game.clone(),
            created_at: room.created_at,
        })
    }

    /// Number of rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ids() -> (RoomId, ConnectionId, ConnectionId, ConnectionId) {
        (
            RoomId::from("room42"),
            ConnectionId::from("c1"),
            ConnectionId::from("c2"),
            ConnectionId::from("c3"),
        )
    }

    #[test]
    fn test_join_assigns_positions_in_order() {
        let table = RoomTable::new();
        let (room, c1, c2, _) = ids();

        assert_eq!(
            table.join(&room, &c1),
            JoinOutcome::Accepted {
                position: Position::Initiator,
                members: vec![c1.clone()],
            }
        );
        assert_eq!(
            table.join(&room, &c2),
            JoinOutcome::Accepted {
                position: Position::Responder,
                members: vec![c1.clone(), c2.clone()],
            }
        );
        assert_eq!(table.members(&room), Some(vec![c1, c2]));
    }

    #[test]
    fn test_third_join_is_rejected_without_mutation() {
        let table = RoomTable::new();
        let (room, c1, c2, c3) = ids();
        table.join(&room, &c1);
        table.join(&room, &c2);

        assert_eq!(table.join(&room, &c3), JoinOutcome::CapacityExceeded);
        assert_eq!(table.members(&room), Some(vec![c1, c2]));
    }

    #[test]
    fn test_with_members_sees_current_membership() {
        let table = RoomTable::new();
        let (room, c1, c2, _) = ids();
        assert_eq!(table.with_members(&room, <[ConnectionId]>::len), None);

        table.join(&room, &c1);
        table.join(&room, &c2);
        assert_eq!(table.with_members(&room, <[ConnectionId]>::len), Some(2));

        table.leave(&room, &c1);
        assert_eq!(table.with_members(&room, <[ConnectionId]>::to_vec), Some(vec![c2]));
    }

    #[test]
    fn test_rejoin_is_already_member() {
        let table = RoomTable::new();
        let (room, c1, c2, _) = ids();
        table.join(&room, &c1);
        table.join(&room, &c2);

        assert_eq!(
            table.join(&room, &c2),
            JoinOutcome::AlreadyMember {
                position: Position::Responder
            }
        );
        assert_eq!(table.members(&room).unwrap().len(), 2);
    }

    #[test]
    fn test_leave_then_delete() {
        let table = RoomTable::new();
        let (room, c1, c2, _) = ids();
        table.join(&room, &c1);
        table.join(&room, &c2);

        assert_eq!(
            table.leave(&room, &c1),
            LeaveOutcome::Left {
                remaining: vec![c2.clone()]
            }
        );
        assert_eq!(table.leave(&room, &c2), LeaveOutcome::RoomDeleted);
        assert!(table.members(&room).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_leave_non_member_is_noop() {
        let table = RoomTable::new();
        let (room, c1, c2, _) = ids();

        assert_eq!(table.leave(&room, &c1), LeaveOutcome::NotMember);

        table.join(&room, &c1);
        assert_eq!(table.leave(&room, &c2), LeaveOutcome::NotMember);
        assert_eq!(table.members(&room), Some(vec![c1]));
    }

    #[test]
    fn test_remaining_member_becomes_initiator_for_next_join() {
        let table = RoomTable::new();
        let (room, c1, c2, c3) = ids();
        table.join(&room, &c1);
        table.join(&room, &c2);
        table.leave(&room, &c1);

        assert!(matches!(
            table.join(&room, &c3),
            JoinOutcome::Accepted {
                position: Position::Responder,
                ..
            }
        ));
        assert_eq!(table.members(&room), Some(vec![c2, c3]));
    }

    #[test]
    fn test_peers_excludes_sender() {
        let table = RoomTable::new();
        let (room, c1, c2, c3) = ids();
        table.join(&room, &c1);

        assert_eq!(table.peers(&room, &c1).unwrap(), Vec::<ConnectionId>::new());

        table.join(&room, &c2);
        assert_eq!(table.peers(&room, &c1).unwrap(), vec![c2.clone()]);
        assert_eq!(table.peers(&room, &c2).unwrap(), vec![c1]);

        assert!(matches!(
            table.peers(&room, &c3),
            Err(SignalingError::NotMember(_))
        ));
        assert!(matches!(
            table.peers(&RoomId::from("nowhere"), &c2),
            Err(SignalingError::UnknownRoom(_))
        ));
    }

    #[test]
    fn test_select_game_and_snapshot() {
        let table = RoomTable::new();
        let (room, c1, _, _) = ids();

        assert!(table.select_game(&room, "chess".to_string()).is_err());

        table.join(&room, &c1);
        table.select_game(&room, "chess".to_string()).unwrap();

        let snapshot = table.snapshot(&room).unwrap();
        assert_eq!(snapshot.game.as_deref(), Some("chess"));
        assert_eq!(snapshot.members, vec![c1.clone()]);
    }

    #[test]
    fn test_concurrent_joins_never_exceed_capacity() {
        let table = Arc::new(RoomTable::new());
        let room = RoomId::from("contended");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let table = Arc::clone(&table);
                let room = room.clone();
                std::thread::spawn(move || {
                    table.join(&room, &ConnectionId::from(format!("c{i}").as_str()))
                })
            })
            .collect();

        let outcomes: Vec<JoinOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let initiators = outcomes
            .iter()
            .filter(|o| matches!(o, JoinOutcome::Accepted { position: Position::Initiator, .. }))
            .count();
        let responders = outcomes
            .iter()
            .filter(|o| matches!(o, JoinOutcome::Accepted { position: Position::Responder, .. }))
            .count();
        let rejected = outcomes
            .iter()
            .filter(|o| **o == JoinOutcome::CapacityExceeded)
            .count();

        assert_eq!(initiators, 1);
        assert_eq!(responders, 1);
        assert_eq!(rejected, 14);
        assert_eq!(table.members(&room).unwrap().len(), ROOM_CAPACITY);
    }
}
