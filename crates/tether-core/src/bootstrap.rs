// ── Bootstrap orchestration ──
//
// One-shot parallel initial load: fetch the listing and the identity
// concurrently, validate both, commit them to the store, then resolve
// the active selection. Every phase is timed.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tether_api::{DataService, IdentityResponse, ListingResponse, ListingStatus};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::model::EntityKind;
use crate::preferences::PreferenceStore;
use crate::store::DataStore;
use crate::store::refresh::BootstrapSnapshot;
use crate::telemetry::MetricsSink;

// ── State ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootstrapStatus {
    #[default]
    Idle,
    Loading,
    DoneLoading,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadResult {
    #[default]
    Pending,
    Success,
    Failure,
}

/// Durations recorded by the last refresh. `None` until measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    /// Domain listing fetch.
    pub listing: Option<Duration>,
    /// Identity/profile fetch.
    pub identity: Option<Duration>,
    /// Both fetches, joined.
    pub parallel_batch: Option<Duration>,
    /// Store commit.
    pub data_processing: Option<Duration>,
    /// Active-selection resolution.
    pub preference_resolution: Option<Duration>,
    pub total: Option<Duration>,
    /// Server-reported processing time for the listing.
    pub server_processing: Option<Duration>,
}

/// Observable bootstrap state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapState {
    pub status: BootstrapStatus,
    pub load_result: LoadResult,
    pub timings: Timings,
    /// Why the last refresh failed, if it did.
    pub failure: Option<String>,
    /// Number of refreshes that ran to completion.
    pub completed: u64,
}

/// What a call to [`BootstrapOrchestrator::refresh`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Ran to completion with the given result.
    Completed(LoadResult),
    /// Another refresh was already loading; nothing was done.
    Rejected,
    /// The session moved on while fetching; the result was discarded.
    Abandoned,
}

/// Invoked once with the final state when a refresh completes.
pub type CompletionCallback = Box<dyn FnOnce(&BootstrapState) + Send>;

// ── Orchestrator ─────────────────────────────────────────────────────

/// Drives the initial load. At most one refresh is in flight at a time.
///
/// Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct BootstrapOrchestrator {
    inner: Arc<BootstrapInner>,
}

struct BootstrapInner {
    data: Arc<dyn DataService>,
    store: Arc<DataStore>,
    prefs: Arc<dyn PreferenceStore>,
    metrics: Arc<dyn MetricsSink>,
    listing_kind: EntityKind,
    selection_key: String,
    state: watch::Sender<BootstrapState>,
    selection: watch::Sender<Option<String>>,
    /// Bumped by `abandon`; a refresh only writes while its epoch is current.
    epoch: AtomicU64,
    /// Set by `retire`; no refresh starts afterwards.
    retired: AtomicBool,
}

/// Validated fetch results, ready to commit.
struct Validated {
    records: Vec<serde_json::Value>,
    identity: serde_json::Value,
}

impl BootstrapOrchestrator {
    pub fn new(
        data: Arc<dyn DataService>,
        store: Arc<DataStore>,
        prefs: Arc<dyn PreferenceStore>,
        metrics: Arc<dyn MetricsSink>,
        listing_kind: EntityKind,
        selection_key: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(BootstrapState::default());
        let (selection, _) = watch::channel(None);
        Self {
            inner: Arc::new(BootstrapInner {
                data,
                store,
                prefs,
                metrics,
                listing_kind,
                selection_key: selection_key.into(),
                state,
                selection,
                epoch: AtomicU64::new(0),
                retired: AtomicBool::new(false),
            }),
        }
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn state(&self) -> BootstrapState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<BootstrapState> {
        self.inner.state.subscribe()
    }

    /// Timings recorded by the most recent refresh.
    pub fn timing_stats(&self) -> Timings {
        self.inner.state.borrow().timings
    }

    pub fn active_selection(&self) -> Option<String> {
        self.inner.selection.borrow().clone()
    }

    pub fn watch_selection(&self) -> watch::Receiver<Option<String>> {
        self.inner.selection.subscribe()
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Run one refresh. Never fails: fetch and validation problems end in
    /// `LoadResult::Failure`.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.run(None).await
    }

    /// Like [`refresh`](Self::refresh), invoking `on_complete` with the
    /// final state if this call runs to completion.
    pub async fn refresh_with(
        &self,
        on_complete: impl FnOnce(&BootstrapState) + Send + 'static,
    ) -> RefreshOutcome {
        self.run(Some(Box::new(on_complete))).await
    }

    /// Discard any in-flight refresh and return to `Idle`.
    pub fn abandon(&self) {
        let inner = &self.inner;
        inner.state.send_modify(|state| {
            inner.epoch.fetch_add(1, Ordering::AcqRel);
            *state = BootstrapState {
                completed: state.completed,
                ..BootstrapState::default()
            };
        });
        debug!("bootstrap abandoned");
    }

    /// Abandon and refuse every later refresh. Used at session end.
    pub fn retire(&self) {
        self.inner.retired.store(true, Ordering::Release);
        self.abandon();
    }

    /// Make `id` the active selection and persist it best-effort.
    /// Returns `false` if no loaded record has that id.
    pub fn select(&self, id: &str) -> bool {
        if !self.inner.store.contains(self.inner.listing_kind, id) {
            return false;
        }
        if let Err(e) = self.inner.prefs.set_item(&self.inner.selection_key, id) {
            warn!(error = %e, "could not persist selection");
        }
        self.inner.selection.send_replace(Some(id.to_owned()));
        info!(id, "selection changed");
        true
    }

    // ── Refresh pipeline ─────────────────────────────────────────────

    async fn run(&self, on_complete: Option<CompletionCallback>) -> RefreshOutcome {
        let epoch = match self.begin() {
            Ok(epoch) => epoch,
            Err(outcome) => return outcome,
        };
        let started = Instant::now();

        let batch_started = Instant::now();
        let ((listing, listing_elapsed), (identity, identity_elapsed)) = tokio::join!(
            timed(self.inner.data.fetch_listing()),
            timed(self.inner.data.fetch_identity()),
        );
        let batch_elapsed = batch_started.elapsed();

        let mut timings = Timings {
            listing: Some(listing_elapsed),
            identity: Some(identity_elapsed),
            parallel_batch: Some(batch_elapsed),
            server_processing: listing
                .as_ref()
                .ok()
                .and_then(|l| l.server_processing_time_ms)
                .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok()),
            ..Timings::default()
        };

        let validated = match validate(listing, identity) {
            Ok(validated) => validated,
            Err(reason) => {
                warn!(%reason, "bootstrap failed");
                timings.total = Some(started.elapsed());
                return self.finish(epoch, LoadResult::Failure, timings, Some(reason), on_complete);
            }
        };

        // Commit under the state lock so an abandoned refresh never lands.
        let processing_started = Instant::now();
        let mut committed: Option<Vec<String>> = None;
        self.inner.state.send_if_modified(|state| {
            if !self.is_current(epoch) {
                return false;
            }
            committed = Some(self.inner.store.apply_bootstrap_snapshot(BootstrapSnapshot {
                kind: self.inner.listing_kind,
                records: validated.records,
                identity: validated.identity,
            }));
            state.load_result = LoadResult::Success;
            true
        });
        let Some(ids) = committed else {
            debug!("refresh abandoned before commit, discarding result");
            return RefreshOutcome::Abandoned;
        };
        timings.data_processing = Some(processing_started.elapsed());

        let resolution_started = Instant::now();
        let selection = self.resolve_selection(epoch, &ids);
        timings.preference_resolution = Some(resolution_started.elapsed());
        timings.total = Some(started.elapsed());

        if self.is_current(epoch) {
            self.inner.selection.send_replace(selection.clone());
        }
        info!(
            records = ids.len(),
            selection = selection.as_deref().unwrap_or("-"),
            total_ms = started.elapsed().as_secs_f64() * 1000.0,
            "bootstrap complete"
        );
        self.finish(epoch, LoadResult::Success, timings, None, on_complete)
    }

    /// Enter `Loading` unless already there. Returns the refresh's epoch.
    fn begin(&self) -> Result<u64, RefreshOutcome> {
        let mut outcome = Err(RefreshOutcome::Rejected);
        self.inner.state.send_if_modified(|state| {
            if self.inner.retired.load(Ordering::Acquire) {
                outcome = Err(RefreshOutcome::Abandoned);
                return false;
            }
            if state.status == BootstrapStatus::Loading {
                return false;
            }
            outcome = Ok(self.inner.epoch.load(Ordering::Acquire));
            *state = BootstrapState {
                status: BootstrapStatus::Loading,
                load_result: LoadResult::Pending,
                timings: Timings::default(),
                failure: None,
                completed: state.completed,
            };
            true
        });
        if let Err(rejected) = outcome {
            debug!(?rejected, "refresh not started");
        }
        outcome
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.epoch.load(Ordering::Acquire) == epoch
    }

    fn finish(
        &self,
        epoch: u64,
        result: LoadResult,
        timings: Timings,
        failure: Option<String>,
        on_complete: Option<CompletionCallback>,
    ) -> RefreshOutcome {
        let mut final_state = None;
        self.inner.state.send_if_modified(|state| {
            if !self.is_current(epoch) {
                return false;
            }
            state.status = BootstrapStatus::DoneLoading;
            state.load_result = result;
            state.timings = timings;
            state.failure = failure;
            state.completed += 1;
            final_state = Some(state.clone());
            true
        });

        let Some(final_state) = final_state else {
            debug!("refresh abandoned before completion, discarding result");
            return RefreshOutcome::Abandoned;
        };

        self.report_timings(&timings);
        if let Some(cb) = on_complete {
            cb(&final_state);
        }
        RefreshOutcome::Completed(result)
    }

    /// Pick the active selection from the persisted preference, falling
    /// back to the first loaded record. The fallback is only persisted
    /// while `epoch` is still current.
    fn resolve_selection(&self, epoch: u64, ids: &[String]) -> Option<String> {
        let key = self.inner.selection_key.as_str();
        let first = ids.first()?;

        match self.inner.prefs.get_item(key) {
            Ok(Some(saved)) if ids.contains(&saved) => {
                debug!(id = %saved, "restored persisted selection");
                return Some(saved);
            }
            Ok(Some(stale)) => {
                debug!(id = %stale, "persisted selection not in listing, using first record");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "preference store unavailable, selecting first record");
                return Some(first.clone());
            }
        }

        if !self.is_current(epoch) {
            debug!("refresh abandoned, not persisting default selection");
            return Some(first.clone());
        }
        if let Err(e) = self.inner.prefs.set_item(key, first) {
            warn!(error = %e, "could not persist default selection");
        }
        Some(first.clone())
    }

    fn report_timings(&self, timings: &Timings) {
        let metrics = &self.inner.metrics;
        let named = [
            ("bootstrap.listing", timings.listing),
            ("bootstrap.identity", timings.identity),
            ("bootstrap.parallel_batch", timings.parallel_batch),
            ("bootstrap.data_processing", timings.data_processing),
            ("bootstrap.preference_resolution", timings.preference_resolution),
            ("bootstrap.total", timings.total),
            ("bootstrap.server_processing", timings.server_processing),
        ];
        for (name, value) in named {
            if let Some(elapsed) = value {
                metrics.timing(name, elapsed);
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let started = Instant::now();
    let out = fut.await;
    (out, started.elapsed())
}

fn validate(
    listing: Result<ListingResponse, tether_api::Error>,
    identity: Result<IdentityResponse, tether_api::Error>,
) -> Result<Validated, String> {
    let listing = listing.map_err(|e| format!("listing fetch failed: {e}"))?;
    let identity = identity.map_err(|e| format!("identity fetch failed: {e}"))?;

    if listing.status == ListingStatus::Failure {
        return Err("listing reported FAILURE".into());
    }
    let serde_json::Value::Array(records) = listing.data else {
        return Err("listing data is not an array".into());
    };
    if is_empty_value(&identity.data) {
        return Err("identity is missing or empty".into());
    }

    Ok(Validated {
        records,
        identity: identity.data,
    })
}

fn is_empty_value(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Bool(_) | serde_json::Value::Number(_) => false,
    }
}
