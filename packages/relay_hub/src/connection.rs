//! Connection
//!
//! One live socket as the hub sees it: a device, a fixed role, and the sending
//! half of a bounded outbound queue.

use axum::body::Bytes;
use axum::extract::ws::Utf8Bytes;
use relay_protocol::{DeviceId, Envelope, ProtocolError, Role};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique ID for one accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a connection, shared with its pumps and used as the sender in
/// routing. Holding one never keeps the outbound queue open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMeta {
    pub id: ConnectionId,
    pub device_id: DeviceId,
    pub role: Role,
}

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Queue at capacity; the frame was dropped.
    Full,
    /// Write pump is gone; the frame was dropped.
    Closed,
}

/// A registered connection.
///
/// Owns the only sender of its outbound queue, so dropping it (which the hub
/// does exactly once, at unregistration) closes the queue and lets the write
/// pump finish.
#[derive(Debug)]
pub struct Connection {
    meta: ConnectionMeta,
    outbound: mpsc::Sender<Utf8Bytes>,
}

impl Connection {
    /// Create a connection and the receiving half its write pump drains.
    pub fn new(
        device_id: DeviceId,
        role: Role,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let conn = Self {
            meta: ConnectionMeta {
                id: ConnectionId::new(),
                device_id,
                role,
            },
            outbound: tx,
        };
        (conn, rx)
    }

    pub fn meta(&self) -> &ConnectionMeta {
        &self.meta
    }

    pub fn id(&self) -> ConnectionId {
        self.meta.id
    }

    pub fn role(&self) -> Role {
        self.meta.role
    }

    pub fn try_enqueue(&self, frame: Utf8Bytes) -> Delivery {
        match self.outbound.try_send(frame) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// A decoded inbound frame together with its original text, which is what
/// gets forwarded so recipients see exactly what the sender wrote.
#[derive(Debug, Clone)]
pub struct Frame {
    pub envelope: Envelope,
    pub raw: Utf8Bytes,
}

impl Frame {
    pub fn parse(raw: Utf8Bytes) -> Result<Self, ProtocolError> {
        let envelope = Envelope::decode(raw.as_str())?;
        Ok(Self { envelope, raw })
    }

    /// Binary frames are accepted when they carry UTF-8 JSON.
    pub fn parse_binary(bytes: Bytes) -> Result<Self, ProtocolError> {
        let text = String::from_utf8(Vec::from(bytes)).map_err(|_| ProtocolError::NotUtf8)?;
        Self::parse(Utf8Bytes::from(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::MessageKind;

    #[test]
    fn enqueue_reports_full_without_blocking() {
        let (conn, mut rx) = Connection::new("dev1".into(), Role::Viewer, 2);

        assert_eq!(conn.try_enqueue("a".into()), Delivery::Delivered);
        assert_eq!(conn.try_enqueue("b".into()), Delivery::Delivered);
        assert_eq!(conn.try_enqueue("c".into()), Delivery::Full);

        assert_eq!(rx.try_recv().unwrap().as_str(), "a");
        assert_eq!(rx.try_recv().unwrap().as_str(), "b");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn enqueue_after_receiver_dropped_is_closed() {
        let (conn, rx) = Connection::new("dev1".into(), Role::Agent, 4);
        drop(rx);
        assert_eq!(conn.try_enqueue("a".into()), Delivery::Closed);
    }

    #[test]
    fn dropping_connection_closes_queue() {
        let (conn, mut rx) = Connection::new("dev1".into(), Role::Agent, 4);
        conn.try_enqueue("last".into());
        drop(conn);
        assert_eq!(rx.try_recv().unwrap().as_str(), "last");
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (conn, _rx) = Connection::new("dev1".into(), Role::Agent, 0);
        assert_eq!(conn.try_enqueue("a".into()), Delivery::Delivered);
    }

    #[test]
    fn frame_keeps_raw_text() {
        let raw = r#"{"type":"terminal_output","payload":{"content":"hello"}}"#;
        let frame = Frame::parse(raw.into()).unwrap();
        assert_eq!(frame.envelope.kind, MessageKind::TerminalOutput);
        assert_eq!(frame.raw.as_str(), raw);
        assert!(Frame::parse("{oops".into()).is_err());
    }

    #[test]
    fn binary_frame_must_be_utf8() {
        let raw = r#"{"type":"terminal_input","payload":{"content":"ls\n"}}"#;
        let frame = Frame::parse_binary(Bytes::from_static(raw.as_bytes())).unwrap();
        assert_eq!(frame.envelope.kind, MessageKind::TerminalInput);
        assert_eq!(frame.raw.as_str(), raw);

        assert!(matches!(
            Frame::parse_binary(Bytes::from_static(&[0xff, 0xfe])),
            Err(ProtocolError::NotUtf8)
        ));
    }

    #[test]
    fn array_frame_is_malformed() {
        let raw = r#"["terminal_output",{"content":"x"}]"#;
        assert!(matches!(
            Frame::parse(raw.into()),
            Err(ProtocolError::NotAnObject)
        ));
    }
}
