//! Pre-configured test data for signaling tests.
//!
//! Provides:
//! - `TestRoom` with frame builders for every inbound event
//! - Sample SDP and ICE payloads with awkward whitespace and escapes, so
//!   byte-for-byte relay can be checked

use serde_json::{json, Value};
use uuid::Uuid;

/// An SDP offer body with CRLFs, odd spacing and key order.
pub const SAMPLE_OFFER: &str = r#"{"type":"offer",  "sdp":"v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0\r\n"}"#;

/// An SDP answer body.
pub const SAMPLE_ANSWER: &str = r#"{"sdp":"v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\n","type":"answer"}"#;

/// An ICE candidate body.
pub const SAMPLE_CANDIDATE: &str = r#"{"candidate":"candidate:842163049 1 udp 1677729535 192.0.2.1 3478 typ srflx","sdpMid":"0","sdpMLineIndex":0}"#;

/// Test room fixture.
#[derive(Debug, Clone)]
pub struct TestRoom {
    /// Room identifier.
    pub id: String,
}

impl TestRoom {
    /// Create a test room with the given ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Create a test room with a random ID.
    #[must_use]
    pub fn random() -> Self {
        Self::new(format!("room-{}", Uuid::new_v4()))
    }

    #[must_use]
    pub fn join_frame(&self) -> String {
        envelope("join-room", &json!({ "roomId": self.id }))
    }

    /// `offer` frame with `body` spliced in as raw JSON.
    #[must_use]
    pub fn offer_frame(&self, body: &str) -> String {
        self.raw_frame("offer", &[("offer", body)])
    }

    #[must_use]
    pub fn answer_frame(&self, body: &str) -> String {
        self.raw_frame("answer", &[("answer", body)])
    }

    #[must_use]
    pub fn candidate_frame(&self, body: &str) -> String {
        self.raw_frame("ice-candidate", &[("candidate", body)])
    }

    #[must_use]
    pub fn chat_frame(&self, message: &str, sender: &str) -> String {
        envelope(
            "chat-message",
            &json!({ "roomId": self.id, "message": message, "sender": sender }),
        )
    }

    #[must_use]
    pub fn game_select_frame(&self, game_type: &str) -> String {
        envelope(
            "game-select",
            &json!({ "roomId": self.id, "gameType": game_type }),
        )
    }

    #[must_use]
    pub fn game_move_frame(&self, game_type: &str, move_data: &Value) -> String {
        envelope(
            "game-move",
            &json!({ "roomId": self.id, "gameType": game_type, "moveData": move_data }),
        )
    }

    /// Build a frame whose data fields are inserted verbatim, preserving the
    /// exact bytes of each body.
    fn raw_frame(&self, event: &str, fields: &[(&str, &str)]) -> String {
        let room = serde_json::to_string(&self.id).unwrap();
        let mut data = format!(r#"{{"roomId":{room}"#);
        for (name, body) in fields {
            data.push_str(&format!(r#","{name}":{body}"#));
        }
        data.push('}');
        format!(r#"{{"event":"{event}","data":{data}}}"#)
    }
}

/// Serialize an envelope with a structured `data` value.
#[must_use]
pub fn envelope(event: &str, data: &Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

/// The exact frame the server sends for an event whose data is `body`.
#[must_use]
pub fn expected_passthrough(event: &str, body: &str) -> String {
    format!(r#"{{"event":"{event}","data":{body}}}"#)
}
