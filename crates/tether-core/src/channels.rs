// ── Channel lifecycle ──
//
// One broadcast channel per entity kind per session. Each channel's
// INSERT/UPDATE/DELETE handlers forward into the EventReconciler until
// the channel is closed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tether_api::{
    BroadcastHandler, BroadcastOp, ChannelRef, ChannelSpec, RealtimeBroker, StatusCallback,
    SubscribeStatus,
};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::EntityKind;
use crate::reconcile::EventReconciler;
use crate::telemetry::MetricsSink;

/// Last timestamp handed out by [`channel_name`]; keeps names strictly
/// increasing even when two channels for a kind open in the same millisecond.
static LAST_CHANNEL_STAMP: AtomicI64 = AtomicI64::new(0);

/// Subscription status of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Pending,
    Subscribed,
    Error(String),
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Subscribed => f.write_str("subscribed"),
            Self::Error(reason) => write!(f, "error: {reason}"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

impl From<SubscribeStatus> for ChannelStatus {
    fn from(status: SubscribeStatus) -> Self {
        match status {
            SubscribeStatus::Subscribed => Self::Subscribed,
            SubscribeStatus::ChannelError(reason) => Self::Error(reason),
            SubscribeStatus::Closed => Self::Closed,
        }
    }
}

/// A live (or closed) channel subscription for one entity kind.
#[derive(Clone)]
pub struct SubscriptionHandle {
    kind: EntityKind,
    name: String,
    channel: ChannelRef,
    live: Arc<AtomicBool>,
    status: watch::Receiver<ChannelStatus>,
}

impl SubscriptionHandle {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Channel name, unique per kind and creation time.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    /// Whether handlers on this channel still forward events.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Watch for status transitions.
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("status", &*self.status.borrow())
            .field("live", &self.is_live())
            .finish()
    }
}

struct Registered {
    handle: SubscriptionHandle,
    status_tx: Arc<watch::Sender<ChannelStatus>>,
}

/// Owns the per-kind channel registry for one session.
pub struct ChannelManager {
    broker: Arc<dyn RealtimeBroker>,
    reconciler: EventReconciler,
    metrics: Arc<dyn MetricsSink>,
    private: bool,
    registry: Mutex<HashMap<EntityKind, Registered>>,
}

impl ChannelManager {
    pub fn new(
        broker: Arc<dyn RealtimeBroker>,
        reconciler: EventReconciler,
        metrics: Arc<dyn MetricsSink>,
        private: bool,
    ) -> Self {
        Self {
            broker,
            reconciler,
            metrics,
            private,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Open the channel for `kind` and start subscribing.
    ///
    /// Returns immediately with a `Pending` handle; the broker's join
    /// outcome arrives through the status callback. A second `open` for
    /// the same kind before `close_all` is rejected.
    pub fn open(&self, kind: EntityKind) -> Result<SubscriptionHandle, CoreError> {
        let mut registry = self.registry();
        if registry.contains_key(&kind) {
            return Err(CoreError::ChannelAlreadyOpen { kind });
        }

        let name = channel_name(kind);
        let live = Arc::new(AtomicBool::new(true));
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Pending);
        let status_tx = Arc::new(status_tx);

        let handlers: Vec<(BroadcastOp, BroadcastHandler)> = BroadcastOp::ALL
            .iter()
            .map(|&op| {
                let live = Arc::clone(&live);
                let reconciler = self.reconciler.clone();
                let handler: BroadcastHandler = Arc::new(move |payload| {
                    if live.load(Ordering::Acquire) {
                        reconciler.dispatch(kind, op, &payload);
                    }
                });
                (op, handler)
            })
            .collect();

        let on_status: StatusCallback = {
            let live = Arc::clone(&live);
            let status_tx = Arc::clone(&status_tx);
            let metrics = Arc::clone(&self.metrics);
            Arc::new(move |status: SubscribeStatus| {
                if !live.load(Ordering::Acquire) {
                    return;
                }
                let next = ChannelStatus::from(status);
                let changed = status_tx.send_if_modified(|current| {
                    if *current == next {
                        false
                    } else {
                        *current = next.clone();
                        true
                    }
                });
                if changed {
                    metrics.channel_status(kind, &next);
                }
            })
        };

        let spec = ChannelSpec {
            name: name.clone(),
            private: self.private,
        };
        // The broker may report a status synchronously from `subscribe`.
        self.metrics.channel_status(kind, &ChannelStatus::Pending);
        let channel = self.broker.subscribe(spec, handlers, on_status);
        debug!(%kind, channel = %name, "channel opened");

        let handle = SubscriptionHandle {
            kind,
            name,
            channel,
            live,
            status: status_rx,
        };
        registry.insert(
            kind,
            Registered {
                handle: handle.clone(),
                status_tx,
            },
        );
        Ok(handle)
    }

    /// Open a channel for every kind in `kinds`, stopping at the first misuse.
    pub fn open_all(&self, kinds: &[EntityKind]) -> Result<Vec<SubscriptionHandle>, CoreError> {
        kinds.iter().map(|&kind| self.open(kind)).collect()
    }

    /// Close every open channel. Returns how many were closed.
    ///
    /// The registry is cleared and every handler disabled before this
    /// returns; leaving the channels on the broker is fire-and-forget.
    /// Calling it again is a no-op.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Registered> = self.registry().drain().map(|(_, r)| r).collect();
        if drained.is_empty() {
            return 0;
        }

        for registered in &drained {
            let kind = registered.handle.kind;
            registered.handle.live.store(false, Ordering::Release);
            registered.status_tx.send_replace(ChannelStatus::Closed);
            self.metrics.channel_status(kind, &ChannelStatus::Closed);
            self.broker.remove_channel(&registered.handle.channel);
        }
        info!(count = drained.len(), "closed all channels");
        drained.len()
    }

    pub fn handle(&self, kind: EntityKind) -> Option<SubscriptionHandle> {
        self.registry().get(&kind).map(|r| r.handle.clone())
    }

    /// Handles of every open channel.
    pub fn handles(&self) -> Vec<SubscriptionHandle> {
        let mut handles: Vec<SubscriptionHandle> =
            self.registry().values().map(|r| r.handle.clone()).collect();
        handles.sort_by_key(SubscriptionHandle::kind);
        handles
    }

    pub fn is_open(&self, kind: EntityKind) -> bool {
        self.registry().contains_key(&kind)
    }

    pub fn open_count(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<EntityKind, Registered>> {
        // A poisoned registry still holds valid handles.
        self.registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// `{base}-{millis}`, strictly increasing across the process.
fn channel_name(kind: EntityKind) -> String {
    let now = Utc::now().timestamp_millis();
    let prev = LAST_CHANNEL_STAMP
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    format!("{}-{}", kind.channel_base(), now.max(prev + 1))
}
