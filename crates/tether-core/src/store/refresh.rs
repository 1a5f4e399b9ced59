// ── Bootstrap commit ──
//
// Applies a validated bootstrap result (listing + identity) to the
// DataStore in one step.

use chrono::Utc;
use tracing::{debug, warn};

use super::DataStore;
use crate::model::{EntityKind, Record, record_id};

/// Everything a successful bootstrap fetch commits.
pub(crate) struct BootstrapSnapshot {
    pub kind: EntityKind,
    pub records: Vec<serde_json::Value>,
    pub identity: serde_json::Value,
}

impl DataStore {
    /// Commit a bootstrap snapshot. Returns committed ids in listing order.
    ///
    /// Listing entries that are not objects or have no usable id are
    /// skipped. Duplicate ids keep the last occurrence's fields but the
    /// first occurrence's position.
    pub(crate) fn apply_bootstrap_snapshot(&self, snap: BootstrapSnapshot) -> Vec<String> {
        let mut order: Vec<String> = Vec::with_capacity(snap.records.len());
        let mut items: Vec<(String, Record)> = Vec::with_capacity(snap.records.len());

        for (index, value) in snap.records.into_iter().enumerate() {
            let serde_json::Value::Object(record) = value else {
                warn!(kind = %snap.kind, index, "skipping non-object listing entry");
                continue;
            };
            let Some(id) = record_id(&record) else {
                warn!(kind = %snap.kind, index, "skipping listing entry without id");
                continue;
            };
            if !order.contains(&id) {
                order.push(id.clone());
            }
            items.push((id, record));
        }

        debug!(kind = %snap.kind, count = order.len(), "committing bootstrap listing");
        self.replace_all(snap.kind, items);
        self.set_identity(snap.identity);
        self.last_commit.send_replace(Some(Utc::now()));

        order
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commit_skips_invalid_entries_and_keeps_order() {
        let store = DataStore::new();
        store.add(
            EntityKind::Device,
            "stale",
            json!({"id": "stale"}).as_object().cloned().unwrap(),
        );

        let ids = store.apply_bootstrap_snapshot(BootstrapSnapshot {
            kind: EntityKind::Device,
            records: vec![
                json!({"id": "B"}),
                json!({"name": "no id"}),
                json!(7),
                json!({"id": "A"}),
            ],
            identity: json!({"id": "user-1"}),
        });

        assert_eq!(ids, vec!["B".to_string(), "A".to_string()]);
        assert_eq!(store.ids(EntityKind::Device), vec!["A".to_string(), "B".to_string()]);
        assert!(store.identity().is_some());
        assert!(store.last_commit().is_some());
    }
}
