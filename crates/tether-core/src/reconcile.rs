// ── Event reconciliation ──
//
// Maps a raw broadcast payload onto a store mutation. Never fails past
// this boundary: malformed events are counted and dropped.

use std::sync::Arc;

use tracing::trace;

use crate::model::{ChangeEvent, ChangeOp, EntityKind};
use crate::store::DataStore;
use crate::telemetry::MetricsSink;

/// Applies change events to the [`DataStore`].
///
/// INSERT adds or replaces, UPDATE merges (inserting unknown ids), DELETE
/// removes (unknown ids are a no-op). Re-applying an event leaves the
/// store unchanged. Events carry no sequence number, so the last arrival
/// wins.
#[derive(Clone)]
pub struct EventReconciler {
    store: Arc<DataStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl EventReconciler {
    pub fn new(store: Arc<DataStore>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { store, metrics }
    }

    /// Reconcile one raw payload delivered on `kind`'s channel.
    pub fn dispatch(&self, kind: EntityKind, op: ChangeOp, payload: &serde_json::Value) {
        self.apply(&ChangeEvent::from_payload(kind, op, payload));
    }

    /// Reconcile an already-split change event.
    pub fn apply(&self, event: &ChangeEvent) {
        let record = match event.canonical() {
            Ok(record) => record,
            Err(reason) => {
                self.metrics.event_dropped(event.kind, event.op, reason);
                return;
            }
        };

        trace!(kind = %event.kind, op = %event.op, id = %record.id, "reconciling");
        match event.op {
            ChangeOp::Insert => {
                self.store.add(event.kind, record.id, record.fields);
            }
            ChangeOp::Update => {
                self.store.update(event.kind, record.id, record.fields);
            }
            ChangeOp::Delete => {
                self.store.delete(event.kind, &record.id);
            }
        }
        self.metrics.event_applied(event.kind, event.op);
    }
}
