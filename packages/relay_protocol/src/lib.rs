//! # Relay Protocol
//!
//! The wire contract between the relay hub and its two kinds of endpoints:
//! the agent (a terminal-capturing process) and any number of viewers (remote
//! displays) sharing a device identifier.
//!
//! ## Envelope
//!
//! Every frame is a JSON object:
//!
//! ```text
//! {"type": "terminal_output", "payload": {"content": "..."}}
//! ```
//!
//! `terminal_output` flows agent → viewers, `terminal_input` flows
//! viewer → agent, and any other type is broadcast to the whole device.
//!
//! ## Connection parameters
//!
//! Endpoints connect with `?device_id=<id>[&token=<pairing token>]`. A pairing
//! token marks the connection as a viewer; without one it is the agent.
//!
//! ```rust
//! use relay_protocol::{ConnectParams, Envelope, MessageKind, Role};
//!
//! let params = ConnectParams::new("dev1", Some("pairing-token".into()));
//! assert_eq!(params.role(), Role::Viewer);
//!
//! let frame = r#"{"type":"terminal_input","payload":{"content":"ls\n"}}"#;
//! let env = Envelope::decode(frame).unwrap();
//! assert_eq!(env.kind, MessageKind::TerminalInput);
//! ```

pub mod device;
pub mod envelope;
pub mod error;

pub use device::{ConnectParams, DeviceId, Role};
pub use envelope::{Envelope, MessageKind};
pub use error::ProtocolError;

/// Query parameter carrying the device identifier.
pub const DEVICE_ID_PARAM: &str = "device_id";

/// Query parameter carrying the optional pairing token.
pub const TOKEN_PARAM: &str = "token";
