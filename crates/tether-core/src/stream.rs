// ── Reactive record streams ──
//
// Subscription handle vended by the DataStore for one entity kind.

use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{EntityKind, Record, record_id};

/// Id-ordered view of one collection.
pub type Snapshot = Arc<Vec<Arc<Record>>>;

/// A subscription to every record of one [`EntityKind`].
///
/// Holds the snapshot seen last, and wakes on the next effective mutation
/// of the collection (identical re-writes are not broadcast).
pub struct EntityStream {
    kind: EntityKind,
    current: Snapshot,
    receiver: watch::Receiver<Snapshot>,
}

impl EntityStream {
    pub(crate) fn new(kind: EntityKind, receiver: watch::Receiver<Snapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self {
            kind,
            current,
            receiver,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Snapshot as of creation or the last `changed()`.
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Look a record up by id in the current snapshot.
    pub fn find(&self, id: &str) -> Option<Arc<Record>> {
        self.current
            .iter()
            .find(|r| record_id(r).as_deref() == Some(id))
            .cloned()
    }

    /// Wait for the next change and return the new snapshot.
    /// `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }
}
