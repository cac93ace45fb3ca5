mod devices;
mod health;
mod websocket;

pub use devices::device_handler;
pub use health::{health_handler, health_live_handler, metrics_handler};
pub use websocket::websocket_handler;
