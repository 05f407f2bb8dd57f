//! Fan-out of chat events to every connection except the sender.

mod broadcaster;

pub use broadcaster::{BroadcastStats, BroadcastStatsSnapshot, Broadcaster, DeliveryReport};
