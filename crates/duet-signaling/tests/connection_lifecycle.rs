//! Connection actor lifecycle under a paused clock.
//!
//! The actor runs over in-memory channels instead of a socket so heartbeat
//! and shutdown timing can be driven deterministically.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::extract::ws::Message;
use common::types::{ConnectionId, RoomId};
use duet_signaling::actors::{ConnectionActor, ConnectionHandle, ConnectionSettings};
use duet_signaling::registry::ConnectionState;
use duet_signaling::session::SessionManager;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const HEARTBEAT: Duration = Duration::from_secs(10);

struct Peer {
    inbound: UnboundedSender<Result<Message, axum::Error>>,
    outbound: UnboundedReceiver<Message>,
    handle: ConnectionHandle,
    task: JoinHandle<()>,
}

impl Peer {
    fn spawn(session: &Arc<SessionManager>) -> Self {
        let settings = ConnectionSettings {
            heartbeat_interval: HEARTBEAT,
            ..ConnectionSettings::default()
        };
        let (sink, outbound) = unbounded();
        let (inbound, stream) = unbounded();
        let (handle, task) =
            ConnectionActor::new(sink, stream, Arc::clone(session), settings).spawn();
        Self {
            inbound,
            outbound,
            handle,
            task,
        }
    }

    fn id(&self) -> ConnectionId {
        self.handle.id().clone()
    }

    fn join(&self, room: &str) {
        let frame = format!(r#"{{"event":"join-room","data":{{"roomId":"{room}"}}}}"#);
        self.inbound
            .unbounded_send(Ok(Message::Text(frame)))
            .unwrap();
    }

    fn pong(&self) {
        self.inbound
            .unbounded_send(Ok(Message::Pong(Vec::new())))
            .unwrap();
    }

    /// Next outbound text frame, skipping pings.
    async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.outbound.next().await? {
                Message::Text(text) => return Some(text),
                Message::Ping(_) => continue,
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_every_connection_within_grace() {
    let session = Arc::new(SessionManager::new(16));
    let mut a = Peer::spawn(&session);
    let mut b = Peer::spawn(&session);
    a.join("room42");
    settle().await;
    b.join("room42");
    assert_eq!(a.next_text().await.unwrap(), r#"{"event":"ready"}"#);

    assert!(session.shutdown(Duration::from_secs(5)).await);

    assert_eq!(session.status().connections, 0);
    assert_eq!(session.room_count(), 0);
    assert!(session.is_shutting_down());

    for peer in [&mut a, &mut b] {
        assert!(matches!(peer.outbound.next().await, Some(Message::Close(None))));
    }
    a.task.await.unwrap();
    b.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_is_dropped_and_partner_reverts_to_joining() {
    let session = Arc::new(SessionManager::new(16));
    let mut initiator = Peer::spawn(&session);
    let mut responder = Peer::spawn(&session);

    initiator.join("room42");
    settle().await;
    responder.join("room42");
    assert_eq!(initiator.next_text().await.unwrap(), r#"{"event":"ready"}"#);
    assert_eq!(session.connection_state(&responder.id()), ConnectionState::Paired);

    // Only the initiator answers heartbeats.
    for _ in 0..4 {
        tokio::time::sleep(HEARTBEAT).await;
        initiator.pong();
        settle().await;
    }

    (&mut responder.task).await.unwrap();
    assert_eq!(
        session.connection_state(&responder.id()),
        ConnectionState::Disconnected
    );
    assert_eq!(
        session.connection_state(&initiator.id()),
        ConnectionState::Joining
    );

    let snapshot = session.room_snapshot(&RoomId::from("room42")).unwrap();
    assert_eq!(snapshot.members, vec![initiator.id()]);
    assert!(!initiator.task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_from_outside_stops_actor() {
    let session = Arc::new(SessionManager::new(16));
    let mut peer = Peer::spawn(&session);
    settle().await;

    assert!(session.disconnect(&peer.id()));
    assert!(matches!(peer.outbound.next().await, Some(Message::Close(None))));
    (&mut peer.task).await.unwrap();

    // The actor's own cleanup finds nothing left to remove.
    assert!(!session.disconnect(&peer.id()));
    assert_eq!(session.status().connections, 0);
}
