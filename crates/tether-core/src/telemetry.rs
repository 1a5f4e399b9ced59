// ── Observability sink ──
//
// Counters, timings and status transitions emitted by the sync
// components. Injected as a collaborator so tests can observe them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channels::ChannelStatus;
use crate::model::{ChangeOp, EntityKind, Rejection};
use crate::supervisor::ConnectionStatus;

/// Receives structured signals from the sync components.
pub trait MetricsSink: Send + Sync {
    /// A change event was applied to the store.
    fn event_applied(&self, kind: EntityKind, op: ChangeOp);

    /// A change event was rejected before reaching the store.
    fn event_dropped(&self, kind: EntityKind, op: ChangeOp, reason: Rejection);

    /// A channel's subscription status changed.
    fn channel_status(&self, kind: EntityKind, status: &ChannelStatus);

    /// The connection status changed.
    fn connection_status(&self, status: &ConnectionStatus);

    /// A named duration was measured.
    fn timing(&self, name: &'static str, elapsed: Duration);
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricCounters {
    pub applied: u64,
    pub malformed: u64,
}

/// Default sink: logs every signal via `tracing` and keeps counters.
#[derive(Debug, Default)]
pub struct TracingMetrics {
    applied: AtomicU64,
    malformed: AtomicU64,
}

impl TracingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> MetricCounters {
        MetricCounters {
            applied: self.applied.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for TracingMetrics {
    fn event_applied(&self, kind: EntityKind, op: ChangeOp) {
        self.applied.fetch_add(1, Ordering::Relaxed);
        debug!(%kind, %op, "change applied");
    }

    fn event_dropped(&self, kind: EntityKind, op: ChangeOp, reason: Rejection) {
        let total = self.malformed.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(%kind, %op, %reason, malformed_total = total, "dropping malformed change event");
    }

    fn channel_status(&self, kind: EntityKind, status: &ChannelStatus) {
        match status {
            ChannelStatus::Error(reason) => warn!(%kind, %reason, "channel error"),
            other => debug!(%kind, status = %other, "channel status"),
        }
    }

    fn connection_status(&self, status: &ConnectionStatus) {
        if status.degraded {
            warn!(
                connected = status.is_connected,
                retries = status.retry_count,
                error = status.last_error.as_deref().unwrap_or(""),
                "connection degraded"
            );
        } else {
            debug!(
                connected = status.is_connected,
                connecting = status.is_connecting,
                retries = status.retry_count,
                "connection status"
            );
        }
    }

    fn timing(&self, name: &'static str, elapsed: Duration) {
        info!(metric = name, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "timing");
    }
}
