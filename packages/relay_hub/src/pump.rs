//! Connection pumps
//!
//! Each accepted socket gets a read pump (socket → hub router) and a write
//! pump (outbound queue → socket). The hub owns the queue's sender, so
//! unregistering is what ends the write pump; a socket failure on either side
//! unregisters the connection.

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_protocol::{DeviceId, Role};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WebSocketConfig;
use crate::connection::{Connection, ConnectionMeta, Frame};
use crate::hub::Hub;

/// Drive one accepted socket for its whole lifetime.
pub async fn run_connection(
    socket: WebSocket,
    hub: Arc<Hub>,
    device_id: DeviceId,
    role: Role,
    config: WebSocketConfig,
) {
    let (conn, outbound) = Connection::new(device_id, role, config.send_queue_capacity);
    let meta = conn.meta().clone();
    hub.register(conn).await;

    // Late joiners see the current screen without waiting for the next update
    if meta.role == Role::Viewer {
        hub.send_last_output(&meta).await;
    }

    let (ws_sender, ws_receiver) = socket.split();
    let cancel = CancellationToken::new();

    let writer = tokio::spawn(write_pump(
        ws_sender,
        outbound,
        hub.clone(),
        meta.clone(),
        config.clone(),
        cancel.clone(),
    ));

    read_pump(ws_receiver, &hub, &meta, config.idle_timeout, &cancel).await;

    hub.unregister(&meta).await;
    if let Err(e) = writer.await {
        warn!(conn_id = %meta.id, "write pump panicked: {}", e);
    }
    info!(device_id = %meta.device_id, conn_id = %meta.id, role = %meta.role, "connection closed");
}

/// Decode inbound frames and hand them to the router until the socket fails,
/// closes, idles out, or the write side gives up.
async fn read_pump(
    mut ws_receiver: SplitStream<WebSocket>,
    hub: &Hub,
    meta: &ConnectionMeta,
    idle_timeout: Option<Duration>,
    cancel: &CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = next_with_timeout(&mut ws_receiver, idle_timeout) => next,
        };

        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                hub.metrics().socket_error();
                debug!(conn_id = %meta.id, "read failed: {}", e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                hub.metrics().socket_error();
                warn!(conn_id = %meta.id, device_id = %meta.device_id, "idle timeout, closing");
                break;
            }
        };

        let parsed = match msg {
            Message::Text(text) => Frame::parse(text),
            Message::Binary(bytes) => Frame::parse_binary(bytes),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match parsed {
            Ok(frame) => {
                hub.route(meta, &frame).await;
            }
            Err(e) => {
                hub.metrics().message_malformed();
                debug!(conn_id = %meta.id, "dropped frame: {}", e);
            }
        }
    }
}

async fn next_with_timeout(
    ws_receiver: &mut SplitStream<WebSocket>,
    idle_timeout: Option<Duration>,
) -> Result<Option<Result<Message, axum::Error>>, tokio::time::error::Elapsed> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, ws_receiver.next()).await,
        None => Ok(ws_receiver.next().await),
    }
}

/// Drain the outbound queue onto the socket in FIFO order. When the hub
/// closes the queue, send a close frame and exit.
async fn write_pump(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    hub: Arc<Hub>,
    meta: ConnectionMeta,
    config: WebSocketConfig,
    cancel: CancellationToken,
) {
    let mut ping = config.ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let msg = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Text(frame),
                None => {
                    let close = Message::Close(None);
                    let _ = send_with_timeout(&mut ws_sender, close, config.write_timeout).await;
                    return;
                }
            },
            _ = tick(&mut ping) => Message::Ping(Bytes::new()),
        };

        if let Err(e) = send_with_timeout(&mut ws_sender, msg, config.write_timeout).await {
            hub.metrics().write_failed();
            warn!(conn_id = %meta.id, device_id = %meta.device_id, "write failed: {}", e);
            cancel.cancel();
            hub.unregister(&meta).await;
            return;
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn send_with_timeout(
    ws_sender: &mut SplitSink<WebSocket, Message>,
    msg: Message,
    write_timeout: Option<Duration>,
) -> anyhow::Result<()> {
    match write_timeout {
        Some(limit) => match tokio::time::timeout(limit, ws_sender.send(msg)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(anyhow::anyhow!("timed out after {:?}", limit)),
        },
        None => Ok(ws_sender.send(msg).await?),
    }
}
