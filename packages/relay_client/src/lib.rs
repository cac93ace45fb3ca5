//! # Relay Client
//!
//! Endpoint side of the relay: a [`ReconnectingTransport`] that holds one
//! logical connection to the hub for an agent or a viewer, redialing with
//! capped exponential backoff whenever the socket drops.
//!
//! ```no_run
//! use relay_client::{ReconnectingTransport, TransportConfig};
//! use relay_protocol::MessageKind;
//!
//! # async fn run() -> Result<(), relay_client::TransportError> {
//! let config = TransportConfig::new("ws://localhost:8080/ws", "dev1");
//! let transport = ReconnectingTransport::connect(config).await?;
//! transport.on_message(|env| println!("{}", env.kind))?;
//! transport
//!     .send(MessageKind::TerminalOutput, &serde_json::json!({ "content": "$ " }))
//!     .await?;
//! transport.close().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod error;
pub mod transport;

pub use backoff::Backoff;
pub use error::TransportError;
pub use transport::{LinkState, ReconnectingTransport, TransportConfig};
