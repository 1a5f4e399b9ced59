// ── Persistent preference capability ──
//
// Key/value storage for the small amount of state that survives a
// session (the last active selection). Either call may fail.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::PreferenceError;

/// String key/value preference storage.
pub trait PreferenceStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, PreferenceError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), PreferenceError>;
}

/// In-memory preferences; lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value, e.g. a selection persisted by a previous run.
    #[must_use]
    pub fn with_item(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Ok(mut items) = self.items.lock() {
            items.insert(key.into(), value.into());
        }
        self
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_item(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        let items = self
            .items
            .lock()
            .map_err(|e| PreferenceError::Unavailable(e.to_string()))?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let mut items = self
            .items
            .lock()
            .map_err(|e| PreferenceError::Unavailable(e.to_string()))?;
        items.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}
