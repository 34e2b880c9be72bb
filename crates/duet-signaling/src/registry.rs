//! Connection registry.
//!
//! Tracks every live connection: its outbound handle, lifecycle state and the
//! room it currently belongs to. Entries are created on connect and removed
//! exactly once on disconnect.

use crate::actors::ConnectionHandle;
use crate::errors::{DeliveryFailure, SignalingError};
use crate::protocol::OutboundEvent;
use common::types::{ConnectionId, RoomId};
use dashmap::DashMap;
use tracing::{debug, warn};

/// Per-connection lifecycle state.
///
/// `Connected -> Joining -> Paired -> Disconnected`. A paired connection
/// whose peer leaves drops back to `Joining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, no room yet.
    Connected,
    /// Member of a room that has no peer yet.
    Joining,
    /// Member of a full room.
    Paired,
    /// Removed from the registry.
    Disconnected,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Joining => "joining",
            ConnectionState::Paired => "paired",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Registry entry for one connection.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub handle: ConnectionHandle,
    pub room: Option<RoomId>,
    pub state: ConnectionState,
}

/// Map of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection in state `Connected`.
    pub fn register(&self, handle: ConnectionHandle) {
        let id = handle.id().clone();
        debug!(target: "duet.registry", connection_id = %id, "Connection registered");
        self.connections.insert(
            id,
            ConnectionEntry {
                handle,
                room: None,
                state: ConnectionState::Connected,
            },
        );
    }

    /// Remove a connection. Returns `None` if it was already removed.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<ConnectionEntry> {
        let removed = self.connections.remove(connection_id).map(|(_, mut entry)| {
            entry.state = ConnectionState::Disconnected;
            entry
        });

        if removed.is_some() {
            debug!(target: "duet.registry", connection_id = %connection_id, "Connection unregistered");
        }
        removed
    }

    /// Current room of a connection.
    #[must_use]
    pub fn lookup(&self, connection_id: &ConnectionId) -> Option<RoomId> {
        self.connections
            .get(connection_id)
            .and_then(|entry| entry.room.clone())
    }

    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Point a connection at a room.
    ///
    /// # Errors
    ///
    /// Returns [`SignalingError::UnknownConnection`] if the connection is gone.
    pub fn set_room(
        &self,
        connection_id: &ConnectionId,
        room_id: RoomId,
        state: ConnectionState,
    ) -> Result<(), SignalingError> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| SignalingError::UnknownConnection(connection_id.to_string()))?;
        entry.room = Some(room_id);
        entry.state = state;
        Ok(())
    }

    /// Update the lifecycle state. Unknown connections are ignored.
    pub fn set_state(&self, connection_id: &ConnectionId, state: ConnectionState) {
        if let Some(mut entry) = self.connections.get_mut(connection_id) {
            entry.state = state;
        }
    }

    /// Lifecycle state; `Disconnected` once the entry is gone.
    #[must_use]
    pub fn state(&self, connection_id: &ConnectionId) -> ConnectionState {
        self.connections
            .get(connection_id)
            .map_or(ConnectionState::Disconnected, |entry| entry.state)
    }

    /// Hand an event to a connection's mailbox without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SignalingError::UnknownConnection`] if the connection is gone,
    /// or [`SignalingError::DeliveryFailed`] if its mailbox is full or closed.
    pub fn deliver(
        &self,
        connection_id: &ConnectionId,
        event: OutboundEvent,
    ) -> Result<(), SignalingError> {
        let entry = self
            .connections
            .get(connection_id)
            .ok_or_else(|| SignalingError::UnknownConnection(connection_id.to_string()))?;

        entry.handle.try_deliver(event).map_err(|reason| {
            if reason == DeliveryFailure::MailboxClosed {
                warn!(
                    target: "duet.registry",
                    connection_id = %connection_id,
                    "Mailbox closed before unregister"
                );
            }
            SignalingError::DeliveryFailed { reason }
        })
    }

    /// Cancel every connection task.
    pub fn cancel_all(&self) {
        for entry in &self.connections {
            entry.handle.cancel();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
