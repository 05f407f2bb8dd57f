//! Per-connection session loop.
//!
//! `Joining -> Active -> Leaving -> Closed`. Every exit from `Active`
//! (clean close, read error, or a panic inside the loop) goes through
//! `Leaving`, which announces the departure and unregisters the connection.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;

use crate::broadcast::Broadcaster;
use crate::connection_manager::{Connection, ConnectionId, ConnectionRegistry};

use super::message::{decode_inbound, EventKind};

/// One inbound unit read from a connection's transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Peer asked to close the connection
    Close,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport read failed: {0}")]
    Read(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Joining,
    Active,
    Leaving,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happened over the lifetime of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub connection_id: ConnectionId,
    pub messages_relayed: u64,
    pub malformed_frames: u64,
    pub panicked: bool,
    pub final_state: SessionState,
}

/// Removes the connection from the registry when dropped, including while
/// unwinding or when the session future is cancelled.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    connection_id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.connection_id);
    }
}

/// Drives one registered connection from join to close.
pub struct Session {
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    state: SessionState,
    messages_relayed: u64,
    malformed_frames: u64,
}

impl Session {
    /// `connection` must already be registered in `registry`.
    pub fn new(
        connection: Arc<Connection>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            connection,
            registry,
            broadcaster,
            state: SessionState::Joining,
            messages_relayed: 0,
            malformed_frames: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session until the inbound stream ends, yields `Frame::Close`,
    /// or fails. The connection is unregistered and closed on return.
    #[tracing::instrument(
        name = "ws.session",
        skip(self, inbound),
        fields(
            connection_id = %self.connection.id,
            display_name = %self.connection.display_name
        )
    )]
    pub async fn run<S>(mut self, inbound: S) -> SessionSummary
    where
        S: Stream<Item = Result<Frame, TransportError>> + Unpin,
    {
        let registration = Registration {
            registry: self.registry.clone(),
            connection_id: self.connection.id,
        };

        let outcome = AssertUnwindSafe(self.join_and_relay(inbound))
            .catch_unwind()
            .await;
        let panicked = match outcome {
            Ok(()) => false,
            Err(panic) => {
                tracing::error!(
                    state = %self.state,
                    panic = %panic_message(&*panic),
                    "Session loop panicked, leaving"
                );
                true
            }
        };

        self.transition(SessionState::Leaving);
        let leave = self
            .broadcaster
            .send(&self.connection, EventKind::LeaveNotice, "");
        if let Err(panic) = AssertUnwindSafe(leave).catch_unwind().await {
            tracing::error!(panic = %panic_message(&*panic), "Leave broadcast panicked");
        }
        drop(registration);

        self.connection.close();
        self.transition(SessionState::Closed);

        SessionSummary {
            connection_id: self.connection.id,
            messages_relayed: self.messages_relayed,
            malformed_frames: self.malformed_frames,
            panicked,
            final_state: self.state,
        }
    }

    async fn join_and_relay<S>(&mut self, mut inbound: S)
    where
        S: Stream<Item = Result<Frame, TransportError>> + Unpin,
    {
        self.broadcaster
            .send(&self.connection, EventKind::JoinNotice, "")
            .await;
        self.transition(SessionState::Active);

        while let Some(item) = inbound.next().await {
            match item {
                Ok(Frame::Text(text)) => self.relay(text.as_bytes()).await,
                Ok(Frame::Binary(bytes)) => self.relay(&bytes).await,
                Ok(Frame::Close) => {
                    tracing::debug!("Received close frame");
                    return;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Transport read ended the session");
                    return;
                }
            }
        }

        tracing::debug!("Inbound stream ended");
    }

    async fn relay(&mut self, bytes: &[u8]) {
        match decode_inbound(bytes) {
            Ok(payload) => {
                self.broadcaster
                    .send(&self.connection, EventKind::ChatMessage, &payload.text)
                    .await;
                self.messages_relayed += 1;
            }
            Err(e) => {
                self.malformed_frames += 1;
                tracing::warn!(error = %e, "Dropping malformed payload");
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = %self.state, to = %next, "Session state change");
        self.state = next;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::Outbound;
    use crate::websocket::Envelope;
    use futures::stream;
    use tokio::sync::mpsc;

    struct Peer {
        connection: Arc<Connection>,
        rx: mpsc::Receiver<Outbound>,
    }

    impl Peer {
        fn join(registry: &ConnectionRegistry, name: &str) -> Self {
            let (tx, rx) = mpsc::channel(16);
            let connection = Arc::new(Connection::new(name, tx));
            registry.add(connection.clone()).unwrap();
            Self { connection, rx }
        }

        fn drain(&mut self) -> Vec<Envelope> {
            let mut out = Vec::new();
            while let Ok(item) = self.rx.try_recv() {
                if let Outbound::Frame(frame) = item {
                    out.push(serde_json::from_str(&frame).unwrap());
                }
            }
            out
        }
    }

    fn setup() -> (Arc<ConnectionRegistry>, Arc<Broadcaster>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
        (registry, broadcaster)
    }

    fn text(s: &str) -> Result<Frame, TransportError> {
        Ok(Frame::Text(s.to_string()))
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (registry, broadcaster) = setup();
        let mut bob = Peer::join(&registry, "bob");
        let mut alice = Peer::join(&registry, "alice");

        let session = Session::new(alice.connection.clone(), registry.clone(), broadcaster);
        assert_eq!(session.state(), SessionState::Joining);

        let inbound = stream::iter(vec![text(r#"{"Message":"hi"}"#), Ok(Frame::Close)]);
        let summary = session.run(inbound).await;

        assert_eq!(summary.messages_relayed, 1);
        assert_eq!(summary.final_state, SessionState::Closed);
        assert!(!summary.panicked);
        assert_eq!(
            bob.drain(),
            vec![
                Envelope::join("alice"),
                Envelope::chat("alice", "hi"),
                Envelope::leave("alice"),
            ]
        );
        assert!(alice.drain().is_empty());
        assert!(!registry.contains(alice.connection.id));
        assert!(alice.connection.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_session_open() {
        let (registry, broadcaster) = setup();
        let mut bob = Peer::join(&registry, "bob");
        let alice = Peer::join(&registry, "alice");

        let inbound = stream::iter(vec![
            text(r#"{"Text":"wrong field"}"#),
            Ok(Frame::Binary(br#"{"Message":"after"}"#.to_vec())),
        ]);
        let summary = Session::new(alice.connection.clone(), registry.clone(), broadcaster)
            .run(inbound)
            .await;

        assert_eq!(summary.malformed_frames, 1);
        assert_eq!(summary.messages_relayed, 1);
        let received = bob.drain();
        assert_eq!(received[1], Envelope::chat("alice", "after"));
        assert_eq!(received.len(), 3);
    }

    #[tokio::test]
    async fn test_read_error_leads_to_leave() {
        let (registry, broadcaster) = setup();
        let mut bob = Peer::join(&registry, "bob");
        let alice = Peer::join(&registry, "alice");

        let inbound = stream::iter(vec![Err(TransportError::Read("connection reset".into()))]);
        Session::new(alice.connection.clone(), registry.clone(), broadcaster)
            .run(inbound)
            .await;

        assert_eq!(bob.drain(), vec![Envelope::join("alice"), Envelope::leave("alice")]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_panic_in_loop_still_leaves() {
        let (registry, broadcaster) = setup();
        let mut bob = Peer::join(&registry, "bob");
        let alice = Peer::join(&registry, "alice");

        let inbound = stream::iter(vec![text(r#"{"Message":"before"}"#)]).chain(
            stream::poll_fn(|_| -> std::task::Poll<Option<Result<Frame, TransportError>>> {
                panic!("transport exploded")
            }),
        );
        let summary = Session::new(alice.connection.clone(), registry.clone(), broadcaster)
            .run(inbound)
            .await;

        assert!(summary.panicked);
        assert_eq!(summary.final_state, SessionState::Closed);
        assert_eq!(bob.drain().last(), Some(&Envelope::leave("alice")));
        assert!(!registry.contains(alice.connection.id));
    }

    #[tokio::test]
    async fn test_dropped_session_unregisters() {
        let (registry, broadcaster) = setup();
        let alice = Peer::join(&registry, "alice");

        let session = Session::new(
            alice.connection.clone(),
            registry.clone(),
            broadcaster.clone(),
        );
        let inbound = stream::pending::<Result<Frame, TransportError>>();
        let handle = tokio::spawn(session.run(inbound));
        // Wait for the join broadcast so the session is parked in Active
        while broadcaster.stats().broadcasts == 0 {
            tokio::task::yield_now().await;
        }
        handle.abort();
        let _ = handle.await;

        assert!(registry.is_empty());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*boxed), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
