use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / relay.toml / env vars)
// =============================================================================
//
//   relay.toml:      [websocket]
//                    send_queue_capacity = 512
//
//   env var:         RELAY_WEBSOCKET__SEND_QUEUE_CAPACITY=512   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub websocket: WebSocketFileConfig,
}

/// Listener settings (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Per-connection tunables (lives under `[websocket]`). A value of 0 for any
/// `*_secs` field disables that timer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebSocketFileConfig {
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

impl Default for WebSocketFileConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: default_send_queue_capacity(),
            write_timeout_secs: default_write_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            idle_timeout_secs: 0,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_send_queue_capacity() -> usize {
    256
}
fn default_write_timeout_secs() -> u64 {
    10
}
fn default_ping_interval_secs() -> u64 {
    30
}

/// Build the layered figment: struct defaults, then `config_path` if it
/// exists, then `RELAY_`-prefixed env vars.
///
///   `RELAY_SERVER__PORT=9000`  →  `server.port = 9000`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("RELAY_").split("__"))
}

// =============================================================================
// Runtime config
// =============================================================================

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub websocket: WebSocketConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    /// Capacity of each connection's outbound queue
    pub send_queue_capacity: usize,
    /// Deadline for a single socket write
    pub write_timeout: Option<Duration>,
    /// Interval between keepalive pings
    pub ping_interval: Option<Duration>,
    /// Close the connection after this long without an inbound frame
    pub idle_timeout: Option<Duration>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig::from_file(&WebSocketFileConfig::default())
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

impl WebSocketConfig {
    pub fn from_file(fc: &WebSocketFileConfig) -> Self {
        Self {
            send_queue_capacity: fc.send_queue_capacity.max(1),
            write_timeout: secs(fc.write_timeout_secs),
            ping_interval: secs(fc.ping_interval_secs),
            idle_timeout: secs(fc.idle_timeout_secs),
        }
    }
}

impl HubConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            server: ServerConfig {
                host: fc.server.host.clone(),
                port: fc.server.port,
            },
            websocket: WebSocketConfig::from_file(&fc.websocket),
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse::<SocketAddr>()
            .with_context(|| {
                format!(
                    "Invalid bind address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }
}
