use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use relay_protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("not connected to hub")]
    NotConnected,

    #[error("transport is closed")]
    Closed,

    #[error("a message handler is already installed")]
    HandlerAlreadyInstalled,

    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
