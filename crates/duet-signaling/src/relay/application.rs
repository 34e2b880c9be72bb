//! Application relay: chat and game events.
//!
//! Payload fields are opaque. `game-select` additionally stores the chosen
//! game label on the room.

use super::Fanout;
use crate::errors::SignalingError;
use crate::protocol::OutboundEvent;
use common::types::{ConnectionId, RoomId};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ApplicationRelay {
    fanout: Fanout,
}

impl ApplicationRelay {
    #[must_use]
    pub fn new(fanout: Fanout) -> Self {
        Self { fanout }
    }

    /// Forward `event` to every member of `room_id` except `sender`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom` or `NotMember` if the sender is not in the room;
    /// the room's game label is left untouched in that case.
    pub fn broadcast_to_room(
        &self,
        room_id: &RoomId,
        sender: &ConnectionId,
        event: OutboundEvent,
    ) -> Result<usize, SignalingError> {
        if let OutboundEvent::GameSelect { game_type } = &event {
            // Same membership errors as the relay itself, before any mutation.
            self.fanout.rooms().peers(room_id, sender)?;
            let label = game_label(game_type.get());
            debug!(target: "duet.relay", room_id = %room_id, game = %label, "Game selected");
            self.fanout.rooms().select_game(room_id, label)?;
        }

        self.fanout.to_peers(room_id, sender, event)
    }
}

/// JSON strings are stored unquoted; any other JSON is stored as written.
fn game_label(raw: &str) -> String {
    serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string())
}
