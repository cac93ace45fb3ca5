use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ProtocolError;

const TERMINAL_OUTPUT: &str = "terminal_output";
const TERMINAL_INPUT: &str = "terminal_input";

/// The `type` field of an envelope.
///
/// Routing matches on this exhaustively; unknown strings are kept verbatim in
/// [`MessageKind::Other`] and broadcast to the whole device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Screen snapshot from the agent.
    TerminalOutput,
    /// Literal bytes typed on a viewer, destined for the agent.
    TerminalInput,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::TerminalOutput => TERMINAL_OUTPUT,
            MessageKind::TerminalInput => TERMINAL_INPUT,
            MessageKind::Other(s) => s,
        }
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            TERMINAL_OUTPUT => MessageKind::TerminalOutput,
            TERMINAL_INPUT => MessageKind::TerminalInput,
            _ => MessageKind::Other(s),
        }
    }
}

impl From<&str> for MessageKind {
    fn from(s: &str) -> Self {
        MessageKind::from(s.to_string())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{type, payload}` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Build an envelope from any serializable payload.
    pub fn with_payload<T: Serialize>(
        kind: MessageKind,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decode a text frame. Anything that is not an object with a string
    /// `type` is malformed.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        // Derived struct visitors also take sequences like `["terminal_output", {}]`
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Decode a binary frame, which must hold UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        Self::decode(text)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The `content` string carried by terminal payloads, if any.
    pub fn content(&self) -> Option<&str> {
        self.payload.get("content").and_then(|v| v.as_str())
    }
}
