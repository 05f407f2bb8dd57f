//! HTTP endpoints that sit beside the WebSocket gateway.

mod health;
mod page;
mod routes;

pub use health::{health, stats, HealthResponse, StatsResponse};
pub use page::index;
pub use routes::api_routes;
