use std::env;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// File served verbatim at `GET /`
    #[serde(default = "default_static_file")]
    pub static_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Outbound queue depth per connection
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    /// Write deadline for a single delivery in milliseconds (0 disables it)
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Registry capacity (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How long to wait for the writer to flush the close frame
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8012
}

fn default_static_file() -> String {
    "index.html".to_string()
}

fn default_channel_buffer() -> usize {
    32
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_max_connections() -> usize {
    10000
}

fn default_close_grace_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Result<Self> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("server.static_file", default_static_file())?
            .set_default("websocket.channel_buffer", default_channel_buffer() as i64)?
            .set_default("websocket.send_timeout_ms", default_send_timeout_ms() as i64)?
            .set_default("websocket.max_connections", default_max_connections() as i64)?
            .set_default("websocket.close_grace_ms", default_close_grace_ms() as i64)?
            .set_default("log.level", default_log_level())?
            .set_default("log.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // RELAY__SERVER__PORT, RELAY__WEBSOCKET__SEND_TIMEOUT_MS, ...
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketConfig {
    pub fn send_timeout(&self) -> Option<Duration> {
        (self.send_timeout_ms > 0).then(|| Duration::from_millis(self.send_timeout_ms))
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_file: default_static_file(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            channel_buffer: default_channel_buffer(),
            send_timeout_ms: default_send_timeout_ms(),
            max_connections: default_max_connections(),
            close_grace_ms: default_close_grace_ms(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
