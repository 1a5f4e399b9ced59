// ── Runtime sync configuration ──
//
// Describes *what* a session synchronizes. Built by the CLI (or tests)
// and handed to the `Controller`; core never reads config files.

use strum::IntoEnumIterator;

use crate::model::EntityKind;

/// Preference key the active selection is persisted under by default.
pub const DEFAULT_SELECTION_KEY: &str = "tether.active_selection";

/// Configuration for a sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Kinds to open a realtime channel for. Duplicates are ignored.
    pub kinds: Vec<EntityKind>,
    /// Kind the bootstrap listing is committed into.
    pub listing_kind: EntityKind,
    /// Preference key for the last active selection.
    pub selection_key: String,
    /// Subscribe to private channels (requires the auth handshake).
    pub private_channels: bool,
    /// Whether `Controller::connection_status()` is available to callers.
    pub expose_connection_status: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            kinds: EntityKind::iter().collect(),
            listing_kind: EntityKind::Device,
            selection_key: DEFAULT_SELECTION_KEY.into(),
            private_channels: true,
            expose_connection_status: true,
        }
    }
}

impl SyncConfig {
    /// Configured kinds in order, without duplicates.
    pub fn channel_kinds(&self) -> Vec<EntityKind> {
        let mut kinds = Vec::with_capacity(self.kinds.len());
        for kind in &self.kinds {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_covers_every_kind() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.channel_kinds().len(), 5);
        assert_eq!(cfg.listing_kind, EntityKind::Device);
    }

    #[test]
    fn channel_kinds_dedupes_in_order() {
        let cfg = SyncConfig {
            kinds: vec![EntityKind::Tag, EntityKind::Device, EntityKind::Tag],
            ..SyncConfig::default()
        };
        assert_eq!(cfg.channel_kinds(), vec![EntityKind::Tag, EntityKind::Device]);
    }
}
