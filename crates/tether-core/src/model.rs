// ── Domain model ──
//
// Entity kinds, raw change events as they arrive off a channel, and the
// canonical record the reconciler actually applies.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

pub use tether_api::BroadcastOp as ChangeOp;

/// A synchronized record: an untyped JSON object keyed by field name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Field every record must carry to be reconciled.
pub const ID_FIELD: &str = "id";

// ── EntityKind ───────────────────────────────────────────────────────

/// Category of synchronized record. Each kind gets its own channel and
/// its own store collection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Device,
    Tag,
    Plan,
    Session,
    Connectivity,
}

impl EntityKind {
    /// Base name of the broadcast channel for this kind.
    pub fn channel_base(self) -> &'static str {
        match self {
            Self::Device => "devices",
            Self::Tag => "tags",
            Self::Plan => "plans",
            Self::Session => "sessions",
            Self::Connectivity => "connectivity",
        }
    }
}

// ── ChangeEvent ──────────────────────────────────────────────────────

/// One inbound change, split out of a raw broadcast payload.
///
/// The broker nests the row under `record` / `old_record` (`new` / `old`
/// on older triggers); `raw` keeps the whole payload as a last resort.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: EntityKind,
    pub op: ChangeOp,
    pub new_record: Option<Record>,
    pub old_record: Option<Record>,
    pub raw: Record,
}

/// Why an event could not be reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Rejection {
    /// No usable `id` in the authoritative record or the raw payload.
    MissingId,
}

/// The resolved record used for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub id: String,
    pub fields: Record,
}

impl ChangeEvent {
    pub fn from_payload(kind: EntityKind, op: ChangeOp, payload: &serde_json::Value) -> Self {
        let raw = payload.as_object().cloned().unwrap_or_default();
        Self {
            kind,
            op,
            new_record: nested_object(&raw, &["record", "new"]),
            old_record: nested_object(&raw, &["old_record", "old"]),
            raw,
        }
    }

    /// Resolve the authoritative record for this event.
    ///
    /// INSERT/UPDATE prefer `new_record`, DELETE prefers `old_record`;
    /// an absent or empty preferred record falls back to `raw`.
    pub fn canonical(&self) -> Result<CanonicalRecord, Rejection> {
        let preferred = match self.op {
            ChangeOp::Insert | ChangeOp::Update => self.new_record.as_ref(),
            ChangeOp::Delete => self.old_record.as_ref(),
        };

        let fields = preferred
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.raw);

        let id = record_id(fields).ok_or(Rejection::MissingId)?;
        Ok(CanonicalRecord {
            id,
            fields: fields.clone(),
        })
    }
}

/// Extract a non-empty identifier from a record. Numeric ids are stringified.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get(ID_FIELD)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn nested_object(raw: &Record, keys: &[&str]) -> Option<Record> {
    keys.iter()
        .find_map(|k| raw.get(*k).and_then(serde_json::Value::as_object))
        .cloned()
}
