// ── File-backed preference store ──
//
// A flat JSON object on disk. Every write rewrites the whole file through
// a temporary sibling and a rename, so a crash never leaves half a file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tether_core::{PreferenceError, PreferenceStore};

/// Persists preference key/value pairs as a JSON object file.
///
/// The file is read once on open and cached; writes update the cache and
/// flush immediately.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FilePreferences {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PreferenceError> {
        let path = path.into();
        let items = match std::fs::read_to_string(&path) {
            Ok(body) if body.trim().is_empty() => BTreeMap::new(),
            Ok(body) => serde_json::from_str(&body).map_err(|e| {
                PreferenceError::Corrupt(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), entries = items.len(), "preferences loaded");
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, items: &BTreeMap<String, String>) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(items)
            .map_err(|e| PreferenceError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get_item(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = items.insert(key.to_owned(), value.to_owned());
        if previous.as_deref() == Some(value) {
            return Ok(());
        }
        if let Err(e) = self.flush(&items) {
            // Keep memory consistent with disk.
            match previous {
                Some(prev) => items.insert(key.to_owned(), prev),
                None => items.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = FilePreferences::open(dir.path().join("prefs.json")).unwrap();
        assert_eq!(prefs.get_item("tether.active_selection").unwrap(), None);
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let prefs = FilePreferences::open(&path).unwrap();
        prefs.set_item("tether.active_selection", "B").unwrap();
        drop(prefs);

        let reopened = FilePreferences::open(&path).unwrap();
        assert_eq!(
            reopened.get_item("tether.active_selection").unwrap().as_deref(),
            Some("B")
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FilePreferences::open(&path).unwrap_err();
        assert!(matches!(err, PreferenceError::Corrupt(_)));
    }

    #[test]
    fn failed_flush_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("prefs.json");
        let prefs = FilePreferences::open(&path).unwrap();
        std::fs::create_dir_all(path.join("blocker")).unwrap();

        assert!(prefs.set_item("k", "v").is_err());
        assert_eq!(prefs.get_item("k").unwrap(), None);
    }
}
