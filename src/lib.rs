// Infrastructure
pub mod config;
pub mod error;
pub mod telemetry;

// Core relay
pub mod broadcast;
pub mod connection_manager;
pub mod websocket;

// Application layer
pub mod api;
pub mod server;
