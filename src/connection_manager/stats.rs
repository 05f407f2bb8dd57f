//! Registry statistics

use serde::Serialize;

/// Point-in-time view of the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    /// `None` when the registry is unbounded
    pub max_connections: Option<usize>,
}
