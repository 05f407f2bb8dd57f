//! Connection management for WebSocket connections
//!
//! This module provides:
//! - The per-client `Connection` handle and its outbound queue
//! - The `ConnectionRegistry` of live connections
//! - Registry statistics

mod registry;
mod stats;
mod types;

pub use registry::ConnectionRegistry;
pub use stats::RegistryStats;
pub use types::{Connection, ConnectionId, DeliveryFailure, Outbound, RegistryError};
