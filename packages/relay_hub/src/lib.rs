//! Relay hub: pairs one agent with any number of viewers per device and
//! relays `{type, payload}` envelopes between them over WebSockets.

pub mod config;
pub mod connection;
pub mod handlers;
pub mod hub;
pub mod metrics;
pub mod pump;
pub mod server;

pub use config::{FileConfig, HubConfig, WebSocketConfig, load_config};
pub use connection::{Connection, ConnectionId, ConnectionMeta, Delivery, Frame};
pub use hub::{DeviceStats, Hub, RouteReport};
pub use metrics::HubMetrics;
pub use server::{AppState, router, serve};
