use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::connection_manager::{Connection, ConnectionRegistry};
use crate::websocket::{encode_outbound, Envelope, EventKind};

/// Maximum number of concurrent recipient deliveries per broadcast
const MAX_CONCURRENT_SENDS: usize = 100;

/// Outcome of a single broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub kind: EventKind,
    /// Recipients in the snapshot, origin excluded
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Counters for the broadcaster
#[derive(Debug, Default)]
pub struct BroadcastStats {
    pub broadcasts: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
}

impl BroadcastStats {
    pub fn snapshot(&self) -> BroadcastStatsSnapshot {
        BroadcastStatsSnapshot {
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastStatsSnapshot {
    pub broadcasts: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Delivers events from one connection to all other registered connections.
///
/// A failed delivery is logged and counted, never fatal to the broadcast, and
/// never removes the recipient: each connection's own session is the only
/// thing that unregisters it.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Option<Duration>,
    stats: BroadcastStats,
}

impl Broadcaster {
    /// Create a broadcaster without a per-delivery write deadline
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self::with_send_timeout(registry, None)
    }

    pub fn with_send_timeout(
        registry: Arc<ConnectionRegistry>,
        send_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            send_timeout,
            stats: BroadcastStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> BroadcastStatsSnapshot {
        self.stats.snapshot()
    }

    /// Broadcast `kind`/`text` from `origin` to every other member of the
    /// current registry snapshot. The envelope is encoded once.
    #[tracing::instrument(
        name = "broadcast.send",
        skip(self, origin, text),
        fields(connection_id = %origin.id, kind = %kind)
    )]
    pub async fn send(&self, origin: &Connection, kind: EventKind, text: &str) -> DeliveryReport {
        let frame = encode_outbound(&Envelope::new(origin.display_name.as_str(), kind, text));

        let recipients: Vec<Arc<Connection>> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|conn| conn.id != origin.id)
            .collect();
        let attempted = recipients.len();

        let deadline = self.send_timeout;
        let outcomes: Vec<_> = stream::iter(recipients)
            .map(|conn| {
                let frame = frame.clone();
                async move {
                    let result = conn.send(frame, deadline).await;
                    (conn, result)
                }
            })
            .buffer_unordered(MAX_CONCURRENT_SENDS)
            .collect()
            .await;

        let mut delivered = 0;
        let mut failed = 0;
        for (conn, result) in outcomes {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        recipient_id = %conn.id,
                        recipient = %conn.display_name,
                        error = %e,
                        "Delivery failed"
                    );
                }
            }
        }

        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.stats.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats.failed.fetch_add(failed as u64, Ordering::Relaxed);

        tracing::debug!(attempted, delivered, failed, "Broadcast complete");

        DeliveryReport {
            kind,
            attempted,
            delivered,
            failed,
        }
    }
}
