#![allow(clippy::unwrap_used)]
// Bootstrap behaviour: exclusivity, validation, selection, timings.

mod common;

use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tether_api::ListingStatus;
use tether_core::{
    BootstrapOrchestrator, BootstrapStatus, DataStore, EntityKind, LoadResult, MemoryPreferences,
    PreferenceError, PreferenceStore, RefreshOutcome, TracingMetrics,
};

use common::{BrokenPrefs, MockData, RecordingPrefs};

const KEY: &str = "tether.active_selection";

fn orchestrator(
    data: MockData,
    prefs: Arc<dyn PreferenceStore>,
) -> (BootstrapOrchestrator, Arc<DataStore>) {
    let store = Arc::new(DataStore::new());
    let orch = BootstrapOrchestrator::new(
        Arc::new(data),
        Arc::clone(&store),
        prefs,
        Arc::new(TracingMetrics::new()),
        EntityKind::Device,
        KEY,
    );
    (orch, store)
}

fn two_devices() -> serde_json::Value {
    json!([{ "id": "A", "name": "Lobby" }, { "id": "B", "name": "Dock" }])
}

async fn wait_loading(orch: &BootstrapOrchestrator) {
    let mut rx = orch.watch();
    tokio::time::timeout(
        Duration::from_secs(1),
        rx.wait_for(|s| s.status == BootstrapStatus::Loading),
    )
    .await
    .unwrap()
    .unwrap();
}

// ── Success path ────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_commits_listing_and_identity() {
    let (orch, store) = orchestrator(MockData::new(two_devices()), Arc::new(MemoryPreferences::new()));
    assert_eq!(orch.state().status, BootstrapStatus::Idle);

    let outcome = orch.refresh().await;

    assert_eq!(outcome, RefreshOutcome::Completed(LoadResult::Success));
    let state = orch.state();
    assert_eq!(state.status, BootstrapStatus::DoneLoading);
    assert_eq!(state.load_result, LoadResult::Success);
    assert_eq!(state.completed, 1);
    assert_eq!(store.ids(EntityKind::Device), vec!["A".to_string(), "B".to_string()]);
    assert_eq!(store.identity().unwrap()["display_name"], "Ops");
    let server = state.timings.server_processing.unwrap();
    assert!((server.as_secs_f64() - 0.0035).abs() < 1e-6);
}

#[tokio::test]
async fn second_refresh_replaces_previous_listing() {
    let data = MockData::new(two_devices());
    let data = Arc::new(data);
    let store = Arc::new(DataStore::new());
    let orch = BootstrapOrchestrator::new(
        data.clone(),
        Arc::clone(&store),
        Arc::new(MemoryPreferences::new()),
        Arc::new(TracingMetrics::new()),
        EntityKind::Device,
        KEY,
    );

    orch.refresh().await;
    *data.listing.lock().unwrap() = json!([{ "id": "C" }]);
    orch.refresh().await;

    assert_eq!(store.ids(EntityKind::Device), vec!["C".to_string()]);
    assert_eq!(orch.state().completed, 2);
    assert_eq!(orch.active_selection().as_deref(), Some("C"));
}

// ── Exclusivity ─────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_refresh_is_rejected() {
    let (data, gate) = MockData::new(two_devices()).gated();
    let (orch, _) = orchestrator(data, Arc::new(MemoryPreferences::new()));
    let completions = Arc::new(AtomicUsize::new(0));

    let first = {
        let orch = orch.clone();
        let completions = Arc::clone(&completions);
        tokio::spawn(async move {
            orch.refresh_with(move |_| {
                completions.fetch_add(1, Ordering::SeqCst);
            })
            .await
        })
    };
    wait_loading(&orch).await;

    let before = orch.state();
    let completions2 = Arc::clone(&completions);
    let second = orch
        .refresh_with(move |_| {
            completions2.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    assert_eq!(second, RefreshOutcome::Rejected);
    assert_eq!(orch.state(), before);

    gate.add_permits(2);
    assert_eq!(
        first.await.unwrap(),
        RefreshOutcome::Completed(LoadResult::Success)
    );
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(orch.state().completed, 1);
}

#[tokio::test]
async fn abandoned_refresh_is_discarded() {
    let (data, gate) = MockData::new(two_devices()).gated();
    let (orch, store) = orchestrator(data, Arc::new(MemoryPreferences::new()));

    let task = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.refresh().await })
    };
    wait_loading(&orch).await;

    orch.abandon();
    assert_eq!(orch.state().status, BootstrapStatus::Idle);
    gate.add_permits(2);

    assert_eq!(task.await.unwrap(), RefreshOutcome::Abandoned);
    assert_eq!(store.count(EntityKind::Device), 0);
    assert!(store.identity().is_none());
    assert_eq!(orch.state().status, BootstrapStatus::Idle);
    assert!(orch.active_selection().is_none());
}

// ── Validation ──────────────────────────────────────────────────────

#[tokio::test]
async fn null_listing_fails_without_commit() {
    let (orch, store) = orchestrator(MockData::new(json!(null)), Arc::new(MemoryPreferences::new()));

    let outcome = orch.refresh().await;

    assert_eq!(outcome, RefreshOutcome::Completed(LoadResult::Failure));
    let state = orch.state();
    assert_eq!(state.status, BootstrapStatus::DoneLoading);
    assert_eq!(state.load_result, LoadResult::Failure);
    assert!(state.failure.unwrap().contains("not an array"));
    assert!(state.timings.total.is_some());
    assert!(state.timings.data_processing.is_none());
    assert_eq!(store.count(EntityKind::Device), 0);
    assert!(store.identity().is_none());
    assert!(store.last_commit().is_none());
}

#[tokio::test]
async fn empty_identity_fails_without_commit() {
    let data = MockData::new(two_devices());
    *data.identity.lock().unwrap() = json!({});
    let (orch, store) = orchestrator(data, Arc::new(MemoryPreferences::new()));

    assert_eq!(orch.refresh().await, RefreshOutcome::Completed(LoadResult::Failure));
    assert_eq!(store.count(EntityKind::Device), 0);
}

#[tokio::test]
async fn failure_status_or_fetch_error_fails() {
    let data = MockData::new(two_devices());
    *data.listing_status.lock().unwrap() = ListingStatus::Failure;
    let (orch, _) = orchestrator(data, Arc::new(MemoryPreferences::new()));
    assert_eq!(orch.refresh().await, RefreshOutcome::Completed(LoadResult::Failure));

    let data = MockData::new(two_devices());
    data.fail_listing.store(true, Ordering::SeqCst);
    let (orch, _) = orchestrator(data, Arc::new(MemoryPreferences::new()));
    assert_eq!(orch.refresh().await, RefreshOutcome::Completed(LoadResult::Failure));
    assert!(orch.state().failure.unwrap().starts_with("listing fetch failed"));
}

// ── Active selection ────────────────────────────────────────────────

#[tokio::test]
async fn persisted_selection_wins_without_write_back() {
    let prefs = Arc::new(RecordingPrefs::seeded(KEY, "B"));
    let (orch, _) = orchestrator(MockData::new(two_devices()), prefs.clone());

    orch.refresh().await;

    assert_eq!(orch.active_selection().as_deref(), Some("B"));
    assert_eq!(prefs.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_selection_defaults_to_first_and_persists() {
    let prefs = Arc::new(RecordingPrefs::default());
    let (orch, _) = orchestrator(MockData::new(two_devices()), prefs.clone());

    orch.refresh().await;

    assert_eq!(orch.active_selection().as_deref(), Some("A"));
    assert_eq!(prefs.value(KEY).as_deref(), Some("A"));
    assert_eq!(prefs.writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_selection_is_replaced() {
    let prefs = Arc::new(RecordingPrefs::seeded(KEY, "gone"));
    let (orch, _) = orchestrator(MockData::new(two_devices()), prefs.clone());

    orch.refresh().await;

    assert_eq!(orch.active_selection().as_deref(), Some("A"));
    assert_eq!(prefs.value(KEY).as_deref(), Some("A"));
}

#[tokio::test]
async fn broken_preferences_fall_back_to_first() {
    let (orch, _) = orchestrator(MockData::new(two_devices()), Arc::new(BrokenPrefs));

    let outcome = orch.refresh().await;

    assert_eq!(outcome, RefreshOutcome::Completed(LoadResult::Success));
    assert_eq!(orch.active_selection().as_deref(), Some("A"));
    assert!(orch.state().timings.preference_resolution.is_some());
}

#[tokio::test]
async fn empty_listing_selects_nothing() {
    let prefs = Arc::new(RecordingPrefs::default());
    let (orch, _) = orchestrator(MockData::new(json!([])), prefs.clone());

    assert_eq!(orch.refresh().await, RefreshOutcome::Completed(LoadResult::Success));
    assert!(orch.active_selection().is_none());
    assert_eq!(prefs.writes.load(Ordering::SeqCst), 0);
}

/// Preferences that end the refresh the moment they are consulted.
struct AbandonOnRead {
    inner: RecordingPrefs,
    orchestrator: OnceLock<BootstrapOrchestrator>,
}

impl PreferenceStore for AbandonOnRead {
    fn get_item(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        if let Some(orch) = self.orchestrator.get() {
            orch.abandon();
        }
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.inner.set_item(key, value)
    }
}

#[tokio::test]
async fn abandoned_refresh_does_not_persist_default_selection() {
    let prefs = Arc::new(AbandonOnRead {
        inner: RecordingPrefs::default(),
        orchestrator: OnceLock::new(),
    });
    let (orch, _store) = orchestrator(MockData::new(two_devices()), prefs.clone());
    assert!(prefs.orchestrator.set(orch.clone()).is_ok());

    let outcome = orch.refresh().await;

    assert_eq!(outcome, RefreshOutcome::Abandoned);
    assert_eq!(prefs.inner.writes.load(Ordering::SeqCst), 0);
    assert_eq!(prefs.inner.value(KEY), None);
    assert_eq!(orch.active_selection(), None);
}

#[tokio::test]
async fn manual_select_requires_loaded_id() {
    let prefs = Arc::new(RecordingPrefs::default());
    let (orch, _) = orchestrator(MockData::new(two_devices()), prefs.clone());
    orch.refresh().await;

    assert!(!orch.select("nope"));
    assert!(orch.select("B"));
    assert_eq!(orch.active_selection().as_deref(), Some("B"));
    assert_eq!(prefs.value(KEY).as_deref(), Some("B"));
}

// ── Timings ─────────────────────────────────────────────────────────

#[tokio::test]
async fn timings_are_monotonic() {
    let data = MockData::new(two_devices())
        .with_delays(Duration::from_millis(30), Duration::from_millis(10));
    let (orch, _) = orchestrator(data, Arc::new(MemoryPreferences::new()));

    orch.refresh().await;

    let t = orch.timing_stats();
    let listing = t.listing.unwrap();
    let identity = t.identity.unwrap();
    let batch = t.parallel_batch.unwrap();
    let total = t.total.unwrap();

    assert!(listing >= Duration::from_millis(30));
    assert!(batch >= listing.max(identity));
    assert!(total >= batch);
    assert!(total >= t.data_processing.unwrap() + t.preference_resolution.unwrap());
    // Fetches overlap rather than run back to back.
    assert!(batch < listing + identity);
}

#[tokio::test]
async fn retired_orchestrator_refuses_refresh() {
    let (orch, store) = orchestrator(MockData::new(two_devices()), Arc::new(MemoryPreferences::new()));
    orch.retire();

    assert_eq!(orch.refresh().await, RefreshOutcome::Abandoned);
    assert_eq!(orch.state().status, BootstrapStatus::Idle);
    assert_eq!(store.count(EntityKind::Device), 0);
}
