//! Hub
//!
//! Registry of live connections per device plus the router that fans frames
//! out between them.
//!
//! - `terminal_output` goes to every viewer of the device except the sender,
//!   and becomes the device's cached last output.
//! - `terminal_input` goes to every agent of the device.
//! - anything else goes to every connection of the device.
//!
//! Routing holds the read side of the connection map, registration the write
//! side. The last-output cache has its own lock so caching never waits on
//! connection-map readers. Every enqueue is `try_send`: a full queue drops that
//! one frame for that one recipient.

use axum::extract::ws::Utf8Bytes;
use relay_protocol::{DeviceId, MessageKind, Role};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionId, ConnectionMeta, Delivery, Frame};
use crate::metrics::HubMetrics;

/// Outcome of one routing call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Per-device view for the HTTP surface.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeviceStats {
    pub device_id: DeviceId,
    pub agents: usize,
    pub viewers: usize,
    pub has_last_output: bool,
}

pub struct Hub {
    /// device -> its live connections. A key is present iff its map is non-empty.
    devices: RwLock<HashMap<DeviceId, HashMap<ConnectionId, Connection>>>,
    /// device -> most recent `terminal_output` frame. Survives unregistration.
    last_output: RwLock<HashMap<DeviceId, Utf8Bytes>>,
    metrics: Arc<HubMetrics>,
}

impl Hub {
    pub fn new(metrics: Arc<HubMetrics>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            last_output: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub fn metrics(&self) -> &HubMetrics {
        &self.metrics
    }

    /// Add a connection to its device's set. Returns false if a connection
    /// with the same ID is already registered; the existing one is kept.
    pub async fn register(&self, conn: Connection) -> bool {
        let meta = conn.meta().clone();
        let total = {
            let mut devices = self.devices.write().await;
            let set = devices.entry(meta.device_id.clone()).or_default();
            if set.contains_key(&meta.id) {
                return false;
            }
            set.insert(meta.id, conn);
            set.len()
        };

        self.metrics.connection_opened();
        info!(
            device_id = %meta.device_id,
            conn_id = %meta.id,
            role = %meta.role,
            total,
            "registered connection"
        );
        true
    }

    /// Remove a connection and close its outbound queue. Deletes the device
    /// entry when its last connection leaves; the cached output stays.
    /// Returns false if the connection was not registered.
    pub async fn unregister(&self, meta: &ConnectionMeta) -> bool {
        let (conn, remaining) = {
            let mut devices = self.devices.write().await;
            let Some(set) = devices.get_mut(&meta.device_id) else {
                return false;
            };
            let Some(conn) = set.remove(&meta.id) else {
                return false;
            };
            let remaining = set.len();
            if remaining == 0 {
                devices.remove(&meta.device_id);
            }
            (conn, remaining)
        };
        // Last sender of the queue; the write pump sees the close.
        drop(conn);

        self.metrics.connection_closed();
        info!(
            device_id = %meta.device_id,
            conn_id = %meta.id,
            role = %meta.role,
            remaining,
            "unregistered connection"
        );
        if remaining == 0 {
            info!(device_id = %meta.device_id, "device has no connections, removed");
        }
        true
    }

    /// Fan a frame out according to its kind. Routing to a device with no
    /// connections is a silent no-op.
    pub async fn route(&self, sender: &ConnectionMeta, frame: &Frame) -> RouteReport {
        self.metrics.message_received();

        let report = match &frame.envelope.kind {
            MessageKind::TerminalOutput => {
                if sender.role != Role::Agent {
                    debug!(
                        device_id = %sender.device_id,
                        conn_id = %sender.id,
                        "terminal_output from a viewer connection; role unchanged"
                    );
                }
                self.last_output
                    .write()
                    .await
                    .insert(sender.device_id.clone(), frame.raw.clone());
                self.fan_out(&sender.device_id, &frame.raw, |c| {
                    c.role == Role::Viewer && c.id != sender.id
                })
                .await
            }
            MessageKind::TerminalInput => {
                self.fan_out(&sender.device_id, &frame.raw, |c| c.role == Role::Agent)
                    .await
            }
            MessageKind::Other(_) => self.fan_out(&sender.device_id, &frame.raw, |_| true).await,
        };

        debug!(
            device_id = %sender.device_id,
            kind = %frame.envelope.kind,
            len = frame.raw.as_str().len(),
            delivered = report.delivered,
            dropped = report.dropped,
            "routed frame"
        );
        report
    }

    /// Enqueue the device's cached output onto one connection, once. Returns
    /// true if something was enqueued.
    ///
    /// The cache read guard is held until the enqueue is done. `route` writes
    /// the cache before fanning out, so a live frame can never land ahead of
    /// an older replay.
    pub async fn send_last_output(&self, meta: &ConnectionMeta) -> bool {
        let cache = self.last_output.read().await;
        let Some(output) = cache.get(&meta.device_id) else {
            return false;
        };
        if output.as_str().is_empty() {
            return false;
        }

        let devices = self.devices.read().await;
        let Some(conn) = devices.get(&meta.device_id).and_then(|set| set.get(&meta.id)) else {
            return false;
        };
        match conn.try_enqueue(output.clone()) {
            Delivery::Delivered => {
                self.metrics.last_output_replayed();
                debug!(device_id = %meta.device_id, conn_id = %meta.id, "replayed last output");
                true
            }
            Delivery::Full | Delivery::Closed => {
                self.metrics.messages_dropped(1);
                false
            }
        }
    }

    async fn fan_out(
        &self,
        device_id: &DeviceId,
        frame: &Utf8Bytes,
        is_target: impl Fn(&ConnectionMeta) -> bool,
    ) -> RouteReport {
        let devices = self.devices.read().await;
        let Some(set) = devices.get(device_id) else {
            return RouteReport::default();
        };

        let mut report = RouteReport::default();
        for conn in set.values().filter(|c| is_target(c.meta())) {
            match conn.try_enqueue(frame.clone()) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Full | Delivery::Closed => {
                    report.dropped += 1;
                    debug!(
                        device_id = %device_id,
                        conn_id = %conn.id(),
                        "outbound queue full, dropped frame"
                    );
                }
            }
        }
        drop(devices);

        self.metrics.messages_delivered(report.delivered as u64);
        self.metrics.messages_dropped(report.dropped as u64);
        report
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn connection_count(&self, device_id: &DeviceId) -> usize {
        self.devices
            .read()
            .await
            .get(device_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    pub async fn total_connections(&self) -> usize {
        self.devices.read().await.values().map(|set| set.len()).sum()
    }

    pub async fn device_snapshot(&self, device_id: &DeviceId) -> Option<DeviceStats> {
        let (agents, viewers) = {
            let devices = self.devices.read().await;
            let set = devices.get(device_id)?;
            let agents = set.values().filter(|c| c.role() == Role::Agent).count();
            (agents, set.len() - agents)
        };
        let has_last_output = self.last_output.read().await.contains_key(device_id);
        Some(DeviceStats {
            device_id: device_id.clone(),
            agents,
            viewers,
            has_last_output,
        })
    }
}
