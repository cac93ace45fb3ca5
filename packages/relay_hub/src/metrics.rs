//! Hub metrics for observability
//!
//! Counters updated on the routing path; all relaxed atomics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Hub-wide metrics
#[derive(Debug, Default)]
pub struct HubMetrics {
    // Connection metrics
    /// Currently registered connections
    pub active_connections: AtomicU64,
    /// Total registrations since start
    pub total_connections: AtomicU64,

    // Message metrics
    /// Frames received and routed (malformed ones excluded)
    pub messages_received: AtomicU64,
    /// Frames enqueued onto a recipient's outbound queue
    pub messages_delivered: AtomicU64,
    /// Frames dropped because a recipient's queue was full or closed
    pub messages_dropped: AtomicU64,
    /// Frames that could not be decoded
    pub messages_malformed: AtomicU64,
    /// Cached outputs replayed to late-joining viewers
    pub last_output_replays: AtomicU64,

    // Error metrics
    /// Socket read/write failures and timeouts
    pub socket_errors: AtomicU64,
    /// Failed or timed out writes to a recipient, a subset of `socket_errors`
    pub write_failures: AtomicU64,
    /// Milliseconds since start of the latest write failure, plus one; 0 = never
    last_write_failure_ms: AtomicU64,

    start_time: Option<Instant>,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_delivered(&self, n: u64) {
        self.messages_delivered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn messages_dropped(&self, n: u64) {
        self.messages_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn message_malformed(&self) {
        self.messages_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_output_replayed(&self) {
        self.last_output_replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn socket_error(&self) {
        self.socket_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A write to a recipient failed or timed out. Counts as a socket error.
    pub fn write_failed(&self) {
        self.socket_error();
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        let now_ms = self.elapsed().as_millis() as u64;
        self.last_write_failure_ms
            .store(now_ms.saturating_add(1), Ordering::Relaxed);
    }

    /// Whether a write failed within the last `window`.
    pub fn write_failed_within(&self, window: Duration) -> bool {
        match self.last_write_failure_ms.load(Ordering::Relaxed) {
            0 => false,
            stamp => {
                let failed_at = Duration::from_millis(stamp - 1);
                self.elapsed().saturating_sub(failed_at) <= window
            }
        }
    }

    fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                delivered: self.messages_delivered.load(Ordering::Relaxed),
                dropped: self.messages_dropped.load(Ordering::Relaxed),
                malformed: self.messages_malformed.load(Ordering::Relaxed),
                last_output_replays: self.last_output_replays.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                socket: self.socket_errors.load(Ordering::Relaxed),
                write: self.write_failures.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub last_output_replays: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub socket: u64,
    pub write: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub devices: u64,
    pub connections: u64,
    pub uptime_secs: u64,
}
