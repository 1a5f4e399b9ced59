// ── Reactive record collection ──
//
// One collection per entity kind. Concurrent storage keyed by record id,
// with push-based change notification via `watch` channels.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

/// What an upsert did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Upserted {
    Inserted,
    Replaced,
    /// The stored value already equalled the new one.
    Unchanged,
}

impl Upserted {
    pub(crate) fn is_new(self) -> bool {
        self == Self::Inserted
    }

    pub(crate) fn changed(self) -> bool {
        self != Self::Unchanged
    }
}

/// A reactive collection for a single entity kind.
///
/// Uses `DashMap` for O(1) concurrent lookups and `watch` channels
/// for push-based change notification. Every effective mutation bumps a
/// version counter and rebuilds the id-ordered snapshot subscribers see.
/// Writes that leave the stored value unchanged are not broadcast.
pub(crate) struct EntityCollection<T: Clone + PartialEq + Send + Sync + 'static> {
    by_id: DashMap<String, Arc<T>>,

    /// Version counter, bumped on every effective mutation.
    version: watch::Sender<u64>,

    /// Id-ordered snapshot, rebuilt on mutation for cheap subscription.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_id: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or replace an entity.
    pub(crate) fn upsert(&self, id: String, entity: T) -> Upserted {
        self.upsert_with(id, |_| entity)
    }

    /// Insert or replace an entity computed from the current value (if any).
    ///
    /// The read-modify-write happens under the shard lock, so concurrent
    /// merges against the same id never lose each other's fields.
    pub(crate) fn upsert_with(&self, id: String, f: impl FnOnce(Option<&T>) -> T) -> Upserted {
        let outcome = match self.by_id.entry(id) {
            Entry::Occupied(mut occupied) => {
                let next = f(Some(occupied.get().as_ref()));
                if *occupied.get().as_ref() == next {
                    Upserted::Unchanged
                } else {
                    occupied.insert(Arc::new(next));
                    Upserted::Replaced
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(f(None)));
                Upserted::Inserted
            }
        };

        if outcome.changed() {
            self.publish();
        }
        outcome
    }

    /// Remove an entity by id. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, id: &str) -> Option<Arc<T>> {
        let removed = self.by_id.remove(id).map(|(_, v)| v);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    /// Replace the whole collection with `items`.
    ///
    /// Upsert-then-prune: incoming entities are written first, then any
    /// ids not present in the incoming set are removed. Subscribers see a
    /// single change instead of a transient empty state.
    pub(crate) fn replace_all(&self, items: Vec<(String, T)>) {
        let incoming: std::collections::HashSet<String> =
            items.iter().map(|(id, _)| id.clone()).collect();

        for (id, entity) in items {
            self.by_id.insert(id, Arc::new(entity));
        }
        self.by_id.retain(|id, _| incoming.contains(id));

        self.publish();
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<T>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All ids currently stored, sorted.
    pub(crate) fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_id.iter().map(|r| r.key().clone()).collect();
        ids.sort_unstable();
        ids
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self) {
        let mut entries: Vec<(String, Arc<T>)> = self
            .by_id
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        let values: Vec<Arc<T>> = entries.into_iter().map(|(_, v)| v).collect();

        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}
