//! Realtime entity synchronization between `tether-api` and its consumers.
//!
//! This crate keeps a local, reactive copy of remote records in step with
//! the data service:
//!
//! - **[`Controller`]**: Owns the session lifecycle.
//!   [`start()`](Controller::start) runs the connection handshake, opens one
//!   broadcast channel per [`EntityKind`] and launches the bootstrap load;
//!   [`stop()`](Controller::stop) tears all of it down.
//!
//! - **[`DataStore`]**: Lock-free per-kind record storage built on
//!   `DashMap` + `tokio::sync::watch`. [`EntityStream`] subscriptions wake
//!   on every effective change.
//!
//! - **[`EventReconciler`]**: Turns raw INSERT/UPDATE/DELETE broadcasts
//!   into idempotent store mutations; malformed events are counted and
//!   dropped.
//!
//! - **[`ChannelManager`]**: One subscription per kind per session, with
//!   observable [`ChannelStatus`] and a synchronous `close_all`.
//!
//! - **[`ConnectionSupervisor`]**: Identity check, realtime-authorization
//!   handshake and an observable [`ConnectionStatus`].
//!
//! - **[`BootstrapOrchestrator`]**: Parallel listing + identity fetch,
//!   validation, atomic commit, active-selection resolution and per-phase
//!   [`Timings`].

pub mod bootstrap;
pub mod channels;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod preferences;
pub mod reconcile;
pub mod store;
pub mod stream;
pub mod supervisor;
pub mod telemetry;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bootstrap::{
    BootstrapOrchestrator, BootstrapState, BootstrapStatus, LoadResult, RefreshOutcome, Timings,
};
pub use channels::{ChannelManager, ChannelStatus, SubscriptionHandle};
pub use config::{DEFAULT_SELECTION_KEY, SyncConfig};
pub use controller::{Controller, Session};
pub use error::{CoreError, PreferenceError};
pub use model::{CanonicalRecord, ChangeEvent, ChangeOp, EntityKind, Record, Rejection};
pub use preferences::{MemoryPreferences, PreferenceStore};
pub use reconcile::EventReconciler;
pub use store::DataStore;
pub use stream::{EntityStream, Snapshot};
pub use supervisor::{ConnectionStatus, ConnectionSupervisor};
pub use telemetry::{MetricCounters, MetricsSink, TracingMetrics};
