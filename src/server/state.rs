use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::broadcast::Broadcaster;
use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let registry = Arc::new(ConnectionRegistry::with_capacity(
            settings.websocket.max_connections,
        ));
        let broadcaster = Arc::new(Broadcaster::with_send_timeout(
            registry.clone(),
            settings.websocket.send_timeout(),
        ));

        Self {
            settings: Arc::new(settings),
            registry,
            broadcaster,
            started_at: Utc::now(),
        }
    }
}
