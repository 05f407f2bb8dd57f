use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Connection, ConnectionId, RegistryError, RegistryStats};

/// The authoritative set of live connections.
///
/// A single mutex guards membership. Broadcasts never iterate the live list:
/// they take a `snapshot()` and deliver without holding the lock, so slow
/// peers cannot stall registration or other broadcasts.
pub struct ConnectionRegistry {
    /// Insertion ordered, unique by `Connection::id`
    members: Mutex<Vec<Arc<Connection>>>,
    /// 0 = unlimited
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a registry holding at most `max_connections` members (0 = unlimited)
    pub fn with_capacity(max_connections: usize) -> Self {
        Self {
            members: Mutex::new(Vec::new()),
            max_connections,
        }
    }

    fn members(&self) -> MutexGuard<'_, Vec<Arc<Connection>>> {
        // The list is never left half-updated, so a poisoned lock is still usable.
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection
    pub fn add(&self, connection: Arc<Connection>) -> Result<(), RegistryError> {
        let mut members = self.members();

        if members.iter().any(|c| c.id == connection.id) {
            tracing::error!(
                connection_id = %connection.id,
                "Duplicate connection identity rejected"
            );
            return Err(RegistryError::DuplicateIdentity(connection.id));
        }

        if self.max_connections > 0 && members.len() >= self.max_connections {
            return Err(RegistryError::CapacityExceeded {
                current: members.len(),
                max: self.max_connections,
            });
        }

        members.push(connection.clone());
        let total = members.len();
        drop(members);

        tracing::info!(
            connection_id = %connection.id,
            display_name = %connection.display_name,
            total_connections = total,
            "Connection registered"
        );

        Ok(())
    }

    /// Unregister a connection. Returns false if it was not registered.
    pub fn remove(&self, connection_id: ConnectionId) -> bool {
        let mut members = self.members();

        let Some(position) = members.iter().position(|c| c.id == connection_id) else {
            return false;
        };
        let removed = members.remove(position);
        let total = members.len();
        drop(members);

        tracing::info!(
            connection_id = %connection_id,
            display_name = %removed.display_name,
            total_connections = total,
            "Connection unregistered"
        );

        true
    }

    /// Point-in-time copy of the members, in registration order
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.members().clone()
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.members().iter().any(|c| c.id == connection_id)
    }

    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_connections: self.len(),
            max_connections: (self.max_connections > 0).then_some(self.max_connections),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
