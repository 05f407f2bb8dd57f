//! Connection handle and related types

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Process-unique identity of a connection, independent of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Item on a connection's outbound queue, drained by its writer pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Pre-encoded frame, shared between all recipients of one broadcast
    Frame(Arc<str>),
    /// Send a close frame and stop writing
    Close,
}

/// Why a single delivery to a single recipient failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    #[error("connection is closed")]
    Closed,
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("outbound queue is closed")]
    QueueClosed,
}

/// Errors returned by `ConnectionRegistry::add`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateIdentity(ConnectionId),
    #[error("connection limit exceeded ({current}/{max})")]
    CapacityExceeded { current: usize, max: usize },
}

/// Handle for a single client connection.
///
/// The outbound queue is the connection's transport: only the broadcaster
/// writes to it, and only the connection's own writer pump reads from it.
pub struct Connection {
    pub id: ConnectionId,
    pub display_name: String,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Outbound>,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(display_name: impl Into<String>, sender: mpsc::Sender<Outbound>) -> Self {
        Self::with_id(ConnectionId::new(), display_name, sender)
    }

    pub fn with_id(
        id: ConnectionId,
        display_name: impl Into<String>,
        sender: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            connected_at: Utc::now(),
            sender,
            closed: AtomicBool::new(false),
        }
    }

    /// Queue an encoded frame, waiting at most `deadline` for queue space.
    pub async fn send(
        &self,
        frame: Arc<str>,
        deadline: Option<Duration>,
    ) -> Result<(), DeliveryFailure> {
        if self.is_closed() {
            return Err(DeliveryFailure::Closed);
        }

        let send = self.sender.send(Outbound::Frame(frame));
        let result = match deadline {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| DeliveryFailure::Timeout(limit))?,
            None => send.await,
        };

        result.map_err(|_| DeliveryFailure::QueueClosed)
    }

    /// Mark the connection closed and ask the writer to send a close frame.
    ///
    /// Only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.sender.try_send(Outbound::Close).is_err() {
            tracing::debug!(
                connection_id = %self.id,
                "Outbound queue full or gone, close frame not queued"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("connected_at", &self.connected_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}
