//! Signaling error types.
//!
//! Errors are handled where they are detected. The only failure a client ever
//! observes is `room-full`; everything else is logged server-side and the
//! offending frame or delivery is dropped.

use common::types::RoomId;
use thiserror::Error;

/// Signaling service error type.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The room already has two members.
    #[error("Room at capacity: {0}")]
    CapacityExceeded(RoomId),

    /// The room identifier is empty or whitespace.
    #[error("Invalid room identifier")]
    InvalidRoomId,

    /// The connection is already a member of another room.
    #[error("Connection already in room: {0}")]
    AlreadyInRoom(RoomId),

    /// Relay or leave targeted a room that has no entry.
    #[error("Room not found: {0}")]
    UnknownRoom(RoomId),

    /// The sender is not a member of the room it addressed.
    #[error("Connection is not a member of room: {0}")]
    NotMember(RoomId),

    /// The connection is not registered (already disconnected).
    #[error("Connection not found: {0}")]
    UnknownConnection(String),

    /// Inbound frame failed structural validation.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Outbound mailbox was full or closed.
    #[error("Delivery failed: {reason}")]
    DeliveryFailed { reason: DeliveryFailure },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a non-blocking delivery into a connection mailbox failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Mailbox at capacity (slow peer).
    MailboxFull,
    /// Receiving side already gone (dead peer).
    MailboxClosed,
}

impl DeliveryFailure {
    /// Returns the failure as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeliveryFailure::MailboxFull => "mailbox_full",
            DeliveryFailure::MailboxClosed => "mailbox_closed",
        }
    }
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SignalingError {
    /// Whether this error is reported back to the client.
    ///
    /// Only capacity rejections are user-visible; every other failure is
    /// silent by contract.
    #[must_use]
    pub fn is_client_visible(&self) -> bool {
        matches!(self, SignalingError::CapacityExceeded(_))
    }
}

impl From<serde_json::Error> for SignalingError {
    fn from(err: serde_json::Error) -> Self {
        SignalingError::MalformedPayload(err.to_string())
    }
}
