use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{health, stats};
use super::page::index;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
}
