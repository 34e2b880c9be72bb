//! `ConnectionActor` - one task per WebSocket connection.
//!
//! Each actor:
//! - registers with the [`SessionManager`] on creation
//! - decodes inbound text frames and hands them to the session manager
//! - drains its mailbox to the socket in FIFO order
//! - pings the client every heartbeat interval and closes the connection if
//!   nothing arrives for two intervals
//!
//! # Lifecycle
//!
//! 1. Created when the `/ws` upgrade completes
//! 2. Runs until the peer closes, the socket fails, the heartbeat lapses or
//!    the session manager cancels it
//! 3. Always ends with [`SessionManager::disconnect`], which is idempotent

use super::metrics::MailboxMonitor;
use crate::errors::DeliveryFailure;
use crate::protocol::OutboundEvent;
use crate::session::SessionManager;

use axum::extract::ws::{Message, WebSocket};
use common::types::ConnectionId;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, instrument, warn};

/// Heartbeat intervals without inbound traffic before the peer is dropped.
const MISSED_HEARTBEATS_LIMIT: u32 = 2;

/// Transport settings applied to every connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Largest inbound text frame accepted, in bytes.
    pub max_frame_bytes: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_frame_bytes: 64 * 1024,
        }
    }
}

/// Producer side of a connection: identity, mailbox sender and cancellation.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<OutboundEvent>,
    cancel_token: CancellationToken,
    monitor: Arc<MailboxMonitor>,
}

impl ConnectionHandle {
    /// Create a handle and its bounded mailbox.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        capacity: usize,
        cancel_token: CancellationToken,
    ) -> (Self, Mailbox) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let monitor = Arc::new(MailboxMonitor::new(id.as_str(), capacity));

        let handle = Self {
            id,
            sender,
            cancel_token,
            monitor: Arc::clone(&monitor),
        };
        (handle, Mailbox { receiver, monitor })
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns the failure reason if the mailbox is full or its receiver is gone.
    pub fn try_deliver(&self, event: OutboundEvent) -> Result<(), DeliveryFailure> {
        // Counted first so a dequeue racing the send cannot precede it.
        self.monitor.record_enqueue();
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.monitor.cancel_enqueue();
                self.monitor.record_drop(DeliveryFailure::MailboxFull.as_str());
                Err(DeliveryFailure::MailboxFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.monitor.cancel_enqueue();
                self.monitor.record_drop(DeliveryFailure::MailboxClosed.as_str());
                Err(DeliveryFailure::MailboxClosed)
            }
        }
    }

    #[must_use]
    pub fn monitor(&self) -> &MailboxMonitor {
        &self.monitor
    }

    /// Stop the connection task.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Resolves once the connection has been cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel_token.cancelled()
    }
}

/// Consumer side of a connection mailbox.
#[derive(Debug)]
pub struct Mailbox {
    receiver: mpsc::Receiver<OutboundEvent>,
    monitor: Arc<MailboxMonitor>,
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.monitor.record_discarded();
    }
}

impl Mailbox {
    /// Wait for the next queued event.
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        let event = self.receiver.recv().await;
        if event.is_some() {
            self.monitor.record_dequeue();
        }
        event
    }

    /// Take the next queued event if one is ready.
    pub fn try_recv(&mut self) -> Option<OutboundEvent> {
        let event = self.receiver.try_recv().ok();
        if event.is_some() {
            self.monitor.record_dequeue();
        }
        event
    }
}

/// The per-connection task.
pub struct ConnectionActor<Tx, Rx> {
    handle: ConnectionHandle,
    mailbox: Mailbox,
    session: Arc<SessionManager>,
    settings: ConnectionSettings,
    sink: Tx,
    stream: Rx,
}

impl ConnectionActor<SplitSink<WebSocket, Message>, SplitStream<WebSocket>> {
    /// Wrap an upgraded WebSocket.
    pub fn from_socket(
        socket: WebSocket,
        session: Arc<SessionManager>,
        settings: ConnectionSettings,
    ) -> Self {
        let (sink, stream) = socket.split();
        Self::new(sink, stream, session, settings)
    }
}

impl<Tx, Rx, E> ConnectionActor<Tx, Rx>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    /// Register a new connection with `session` over the given transport halves.
    pub fn new(sink: Tx, stream: Rx, session: Arc<SessionManager>, settings: ConnectionSettings) -> Self {
        let (handle, mailbox) = session.connect();
        Self {
            handle,
            mailbox,
            session,
            settings,
            sink,
            stream,
        }
    }

    /// Spawn the actor onto the runtime.
    pub fn spawn(self) -> (ConnectionHandle, JoinHandle<()>)
    where
        Tx: Send + 'static,
        Rx: Send + 'static,
        E: Send + 'static,
    {
        let handle = self.handle.clone();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    /// Run the connection loop until the connection ends.
    #[instrument(skip_all, name = "duet.actor.connection", fields(connection_id = %self.handle.id()))]
    pub async fn run(mut self) {
        let id = self.handle.id().clone();
        let cancel_token = self.handle.cancel_token.clone();
        let interval = self.settings.heartbeat_interval;
        let idle_limit = interval.saturating_mul(MISSED_HEARTBEATS_LIMIT);

        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_seen = Instant::now();

        debug!(target: "duet.connection", connection_id = %id, "ConnectionActor started");

        let reason = loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    let _ = self.sink.send(Message::Close(None)).await;
                    break "cancelled";
                }

                Some(event) = self.mailbox.recv() => {
                    if let Err(reason) = self.write_event(&id, &event).await {
                        break reason;
                    }
                }

                _ = heartbeat.tick() => {
                    if last_seen.elapsed() > idle_limit {
                        break "heartbeat_timeout";
                    }
                    if let Err(e) = self.sink.send(Message::Ping(Vec::new())).await {
                        debug!(target: "duet.connection", connection_id = %id, error = %e, "Ping failed");
                        break "write_failed";
                    }
                }

                frame = self.stream.next() => {
                    match frame {
                        Some(Ok(message)) => {
                            last_seen = Instant::now();
                            match message {
                                Message::Text(text) => {
                                    if text.len() > self.settings.max_frame_bytes {
                                        self.session.reject_frame(&id, "oversized", text.len());
                                    } else {
                                        self.session.handle_text(&id, &text);
                                    }
                                }
                                Message::Binary(bytes) => {
                                    self.session.reject_frame(&id, "binary", bytes.len());
                                }
                                Message::Close(_) => break "closed_by_peer",
                                Message::Ping(_) | Message::Pong(_) => {}
                            }
                        }
                        Some(Err(e)) => {
                            debug!(target: "duet.connection", connection_id = %id, error = %e, "Read failed");
                            break "read_failed";
                        }
                        None => break "stream_ended",
                    }
                }
            }
        };

        self.session.disconnect(&id);

        info!(
            target: "duet.connection",
            connection_id = %id,
            reason,
            messages_processed = self.handle.monitor().messages_processed(),
            messages_dropped = self.handle.monitor().messages_dropped(),
            "ConnectionActor stopped"
        );
    }

    async fn write_event(&mut self, id: &ConnectionId, event: &OutboundEvent) -> Result<(), &'static str> {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "duet.connection", connection_id = %id, error = %e, "Encode failed, event skipped");
                return Ok(());
            }
        };

        self.sink.send(Message::Text(frame)).await.map_err(|e| {
            debug!(target: "duet.connection", connection_id = %id, error = %e, "Write failed");
            "write_failed"
        })
    }
}
