//! Signaling wire protocol.
//!
//! Every WebSocket text frame is a JSON envelope:
//!
//! ```text
//! {"event": "offer", "data": {"roomId": "room42", "offer": {...}}}
//! ```
//!
//! Inbound frames are decoded in two steps: the envelope first (event name plus
//! the borrowed raw `data` slice), then the typed payload for that event name.
//! Passthrough bodies (`offer`, `answer`, `candidate`, chat and game fields)
//! are kept as [`RawValue`] so the bytes forwarded to the peer are exactly the
//! bytes the sender wrote.

use crate::errors::SignalingError;
use common::types::RoomId;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Opaque JSON body relayed verbatim.
pub type RawBody = Box<RawValue>;

#[derive(Deserialize)]
struct Envelope<'a> {
    event: String,
    #[serde(borrow, default)]
    data: Option<&'a RawValue>,
}

/// `join-room` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: RoomId,
}

/// `offer` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub room_id: RoomId,
    pub offer: RawBody,
}

/// `answer` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub room_id: RoomId,
    pub answer: RawBody,
}

/// `ice-candidate` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub room_id: RoomId,
    pub candidate: RawBody,
}

/// `chat-message` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub room_id: RoomId,
    pub message: RawBody,
    pub sender: RawBody,
}

/// `game-select` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSelectPayload {
    pub room_id: RoomId,
    pub game_type: RawBody,
}

/// `game-move` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMovePayload {
    pub room_id: RoomId,
    pub game_type: RawBody,
    pub move_data: RawBody,
}

/// Events a client may send.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    JoinRoom(JoinRoom),
    Offer(OfferPayload),
    Answer(AnswerPayload),
    IceCandidate(CandidatePayload),
    ChatMessage(ChatPayload),
    GameSelect(GameSelectPayload),
    GameMove(GameMovePayload),
}

impl InboundEvent {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SignalingError::MalformedPayload`] for invalid JSON, unknown
    /// event names, a missing `data` object, or missing required fields.
    pub fn parse(frame: &str) -> Result<Self, SignalingError> {
        let envelope: Envelope<'_> = serde_json::from_str(frame)?;
        let data = envelope
            .data
            .ok_or_else(|| SignalingError::MalformedPayload("missing data".to_string()))?
            .get();

        let event = match envelope.event.as_str() {
            "join-room" => InboundEvent::JoinRoom(serde_json::from_str(data)?),
            "offer" => InboundEvent::Offer(serde_json::from_str(data)?),
            "answer" => InboundEvent::Answer(serde_json::from_str(data)?),
            "ice-candidate" => InboundEvent::IceCandidate(serde_json::from_str(data)?),
            "chat-message" => InboundEvent::ChatMessage(serde_json::from_str(data)?),
            "game-select" => InboundEvent::GameSelect(serde_json::from_str(data)?),
            "game-move" => InboundEvent::GameMove(serde_json::from_str(data)?),
            other => {
                return Err(SignalingError::MalformedPayload(format!(
                    "unknown event: {other}"
                )))
            }
        };

        Ok(event)
    }

    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            InboundEvent::JoinRoom(_) => "join-room",
            InboundEvent::Offer(_) => "offer",
            InboundEvent::Answer(_) => "answer",
            InboundEvent::IceCandidate(_) => "ice-candidate",
            InboundEvent::ChatMessage(_) => "chat-message",
            InboundEvent::GameSelect(_) => "game-select",
            InboundEvent::GameMove(_) => "game-move",
        }
    }
}

/// Events the server sends to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Room reached two members; the recipient must send the offer.
    Ready,
    /// Join rejected, the room already has two members.
    RoomFull,
    Offer(RawBody),
    Answer(RawBody),
    IceCandidate(RawBody),
    ChatMessage {
        message: RawBody,
        sender: RawBody,
    },
    GameSelect {
        #[serde(rename = "gameType")]
        game_type: RawBody,
    },
    GameMove {
        #[serde(rename = "gameType")]
        game_type: RawBody,
        #[serde(rename = "moveData")]
        move_data: RawBody,
    },
}

impl OutboundEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Ready => "ready",
            OutboundEvent::RoomFull => "room-full",
            OutboundEvent::Offer(_) => "offer",
            OutboundEvent::Answer(_) => "answer",
            OutboundEvent::IceCandidate(_) => "ice-candidate",
            OutboundEvent::ChatMessage { .. } => "chat-message",
            OutboundEvent::GameSelect { .. } => "game-select",
            OutboundEvent::GameMove { .. } => "game-move",
        }
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SignalingError::Internal`] if serialization fails.
    pub fn to_frame(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self)
            .map_err(|e| SignalingError::Internal(format!("encode {}: {e}", self.name())))
    }
}
