// ── Central reactive data store ──
//
// Thread-safe, lock-free storage for every synchronized entity kind.
// Mutations are broadcast to subscribers via `watch` channels.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::collection::EntityCollection;
use crate::model::{EntityKind, Record};
use crate::stream::{EntityStream, Snapshot};

/// Central reactive store, one collection per [`EntityKind`].
///
/// All reads are wait-free; writes take fine-grained per-shard locks
/// inside `DashMap`. Per-id writes are atomic, so concurrent dispatches
/// against the same record never interleave mid-merge.
pub struct DataStore {
    pub(crate) devices: EntityCollection<Record>,
    pub(crate) tags: EntityCollection<Record>,
    pub(crate) plans: EntityCollection<Record>,
    pub(crate) sessions: EntityCollection<Record>,
    pub(crate) connectivity: EntityCollection<Record>,
    pub(crate) identity: watch::Sender<Option<Arc<serde_json::Value>>>,
    pub(crate) last_commit: watch::Sender<Option<DateTime<Utc>>>,
    pub(crate) last_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl DataStore {
    pub fn new() -> Self {
        let (identity, _) = watch::channel(None);
        let (last_commit, _) = watch::channel(None);
        let (last_event, _) = watch::channel(None);

        Self {
            devices: EntityCollection::new(),
            tags: EntityCollection::new(),
            plans: EntityCollection::new(),
            sessions: EntityCollection::new(),
            connectivity: EntityCollection::new(),
            identity,
            last_commit,
            last_event,
        }
    }

    pub(crate) fn collection(&self, kind: EntityKind) -> &EntityCollection<Record> {
        match kind {
            EntityKind::Device => &self.devices,
            EntityKind::Tag => &self.tags,
            EntityKind::Plan => &self.plans,
            EntityKind::Session => &self.sessions,
            EntityKind::Connectivity => &self.connectivity,
        }
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Add a record, replacing any existing record with the same id.
    /// Returns `true` if the id was new.
    pub fn add(&self, kind: EntityKind, id: impl Into<String>, record: Record) -> bool {
        let outcome = self.collection(kind).upsert(id.into(), record);
        self.touch_event_if(outcome.changed());
        outcome.is_new()
    }

    /// Merge `fields` into the record with this id, inserting it if unknown.
    /// Returns `true` if the id was new.
    pub fn update(&self, kind: EntityKind, id: impl Into<String>, fields: Record) -> bool {
        let outcome = self.collection(kind).upsert_with(id.into(), |existing| {
            let mut merged = existing.cloned().unwrap_or_default();
            for (key, value) in fields {
                merged.insert(key, value);
            }
            merged
        });
        self.touch_event_if(outcome.changed());
        outcome.is_new()
    }

    /// Remove a record by id. Unknown ids are a no-op.
    pub fn delete(&self, kind: EntityKind, id: &str) -> Option<Arc<Record>> {
        let removed = self.collection(kind).remove(id);
        self.touch_event_if(removed.is_some());
        removed
    }

    /// Replace every record of `kind`; ids not in `records` are dropped.
    pub fn replace_all(&self, kind: EntityKind, records: Vec<(String, Record)>) {
        self.collection(kind).replace_all(records);
    }

    /// Store the committed identity/profile payload.
    pub fn set_identity(&self, identity: serde_json::Value) {
        self.identity
            .send_modify(|current| *current = Some(Arc::new(identity)));
    }

    fn touch_event_if(&self, changed: bool) {
        if changed {
            // `send` is a no-op without receivers; `send_replace` always stores.
            self.last_event.send_replace(Some(Utc::now()));
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn snapshot(&self, kind: EntityKind) -> Snapshot {
        self.collection(kind).snapshot()
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<Arc<Record>> {
        self.collection(kind).get(id)
    }

    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.collection(kind).contains(id)
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.collection(kind).len()
    }

    /// Sorted ids currently stored for `kind`.
    pub fn ids(&self, kind: EntityKind) -> Vec<String> {
        self.collection(kind).ids()
    }

    /// Mutation counter for `kind`; only effective changes bump it.
    pub fn version(&self, kind: EntityKind) -> u64 {
        self.collection(kind).version()
    }

    pub fn identity(&self) -> Option<Arc<serde_json::Value>> {
        self.identity.borrow().clone()
    }

    pub fn last_commit(&self) -> Option<DateTime<Utc>> {
        *self.last_commit.borrow()
    }

    pub fn last_event(&self) -> Option<DateTime<Utc>> {
        *self.last_event.borrow()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe(&self, kind: EntityKind) -> EntityStream {
        EntityStream::new(kind, self.collection(kind).subscribe())
    }

    pub fn subscribe_identity(&self) -> watch::Receiver<Option<Arc<serde_json::Value>>> {
        self.identity.subscribe()
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn update_merges_fields() {
        let store = DataStore::new();
        store.add(EntityKind::Device, "d1", rec(json!({"id": "d1", "name": "a", "online": false})));
        let is_new = store.update(EntityKind::Device, "d1", rec(json!({"id": "d1", "online": true})));
        assert!(!is_new);

        let d = store.get(EntityKind::Device, "d1").unwrap();
        assert_eq!(d["name"], "a");
        assert_eq!(d["online"], true);
    }

    #[test]
    fn update_inserts_unknown_id() {
        let store = DataStore::new();
        assert!(store.update(EntityKind::Tag, "t1", rec(json!({"id": "t1"}))));
        assert_eq!(store.count(EntityKind::Tag), 1);
    }

    #[test]
    fn kinds_are_isolated() {
        let store = DataStore::new();
        store.add(EntityKind::Plan, "x", rec(json!({"id": "x"})));
        assert!(store.contains(EntityKind::Plan, "x"));
        assert!(!store.contains(EntityKind::Session, "x"));
        assert!(store.delete(EntityKind::Session, "x").is_none());
        assert_eq!(store.count(EntityKind::Plan), 1);
    }

    #[test]
    fn last_event_tracks_effective_mutations_only() {
        let store = DataStore::new();
        assert!(store.last_event().is_none());

        store.delete(EntityKind::Device, "missing");
        assert!(store.last_event().is_none());

        store.add(EntityKind::Device, "d1", rec(json!({"id": "d1"})));
        let stamped = store.last_event();
        assert!(stamped.is_some());

        store.delete(EntityKind::Device, "missing");
        store.add(EntityKind::Device, "d1", rec(json!({"id": "d1"})));
        assert_eq!(store.last_event(), stamped);

        store.delete(EntityKind::Device, "d1");
        assert!(store.last_event() >= stamped);
        assert_eq!(store.count(EntityKind::Device), 0);
    }

    #[test]
    fn identity_round_trips() {
        let store = DataStore::new();
        assert!(store.identity().is_none());
        store.set_identity(json!({"id": "u1"}));
        assert_eq!(store.identity().unwrap()["id"], "u1");
    }

    #[tokio::test]
    async fn stream_sees_mutation() {
        let store = DataStore::new();
        let mut stream = store.subscribe(EntityKind::Connectivity);
        assert!(stream.current().is_empty());

        store.add(EntityKind::Connectivity, "c1", rec(json!({"id": "c1"})));
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert!(stream.find("c1").is_some());
        assert_eq!(stream.kind(), EntityKind::Connectivity);
    }
}
