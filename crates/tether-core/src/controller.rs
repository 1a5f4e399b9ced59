// ── Controller ──
//
// Session lifecycle: wires the supervisor, channel manager and bootstrap
// orchestrator around one shared broker handle, and tears them down
// again on stop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tether_api::{DataService, RealtimeBroker};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bootstrap::{BootstrapOrchestrator, RefreshOutcome};
use crate::channels::ChannelManager;
use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::model::EntityKind;
use crate::preferences::PreferenceStore;
use crate::reconcile::EventReconciler;
use crate::store::DataStore;
use crate::stream::EntityStream;
use crate::supervisor::{ConnectionStatus, ConnectionSupervisor};
use crate::telemetry::{MetricsSink, TracingMetrics};

// ── Session ──────────────────────────────────────────────────────────

/// Everything that lives exactly as long as one start/stop cycle.
pub struct Session {
    id: u64,
    started_at: DateTime<Utc>,
    channels: Arc<ChannelManager>,
    supervisor: ConnectionSupervisor,
    bootstrap: BootstrapOrchestrator,
    cancel: CancellationToken,
}

impl Session {
    /// Sequence number, unique per controller.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn bootstrap(&self) -> &BootstrapOrchestrator {
        &self.bootstrap
    }

    fn shutdown(&self) {
        self.channels.close_all();
        self.bootstrap.retire();
        self.supervisor.stop();
        self.cancel.cancel();
    }
}

// ── Controller ───────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Holds the broker and
/// data-service handles for its whole lifetime; the store outlives
/// individual sessions.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: SyncConfig,
    broker: Arc<dyn RealtimeBroker>,
    data: Arc<dyn DataService>,
    prefs: Arc<dyn PreferenceStore>,
    metrics: Arc<dyn MetricsSink>,
    store: Arc<DataStore>,
    session: Mutex<Option<Arc<Session>>>,
    next_session: AtomicU64,
}

impl Controller {
    /// Create a controller. Does NOT start a session -- call
    /// [`start()`](Self::start).
    pub fn new(
        config: SyncConfig,
        broker: Arc<dyn RealtimeBroker>,
        data: Arc<dyn DataService>,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self::build(config, broker, data, prefs, Arc::new(TracingMetrics::new()))
    }

    /// Replace the metrics sink. Call before `start()`.
    pub fn with_metrics(self, metrics: Arc<dyn MetricsSink>) -> Self {
        let inner = &self.inner;
        Self::build(
            inner.config.clone(),
            Arc::clone(&inner.broker),
            Arc::clone(&inner.data),
            Arc::clone(&inner.prefs),
            metrics,
        )
    }

    fn build(
        config: SyncConfig,
        broker: Arc<dyn RealtimeBroker>,
        data: Arc<dyn DataService>,
        prefs: Arc<dyn PreferenceStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                config,
                broker,
                data,
                prefs,
                metrics,
                store: Arc::new(DataStore::new()),
                session: Mutex::new(None),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Access the underlying DataStore.
    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    /// Subscribe to every record of `kind`.
    pub fn subscribe(&self, kind: EntityKind) -> EntityStream {
        self.inner.store.subscribe(kind)
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Start a session.
    ///
    /// Starts the connection handshake in the background, opens one
    /// channel per configured kind without waiting for it, and kicks off
    /// the bootstrap refresh. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<Arc<Session>, CoreError> {
        let runtime = Handle::try_current().map_err(|e| CoreError::Config {
            message: format!("no Tokio runtime: {e}"),
        })?;

        let mut slot = self.session_slot();
        if slot.is_some() {
            return Err(CoreError::SessionAlreadyActive);
        }

        let inner = &self.inner;
        let id = inner.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let reconciler = EventReconciler::new(Arc::clone(&inner.store), Arc::clone(&inner.metrics));
        let channels = Arc::new(ChannelManager::new(
            Arc::clone(&inner.broker),
            reconciler,
            Arc::clone(&inner.metrics),
            inner.config.private_channels,
        ));
        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&inner.broker),
            Arc::clone(&inner.data),
            Arc::clone(&inner.metrics),
            cancel.clone(),
        );
        let bootstrap = BootstrapOrchestrator::new(
            Arc::clone(&inner.data),
            Arc::clone(&inner.store),
            Arc::clone(&inner.prefs),
            Arc::clone(&inner.metrics),
            inner.config.listing_kind,
            inner.config.selection_key.clone(),
        );

        let session = Arc::new(Session {
            id,
            started_at: Utc::now(),
            channels,
            supervisor,
            bootstrap,
            cancel,
        });

        // Subscribe to system events before anything can emit them.
        session.supervisor.listen();
        {
            let supervisor = session.supervisor.clone();
            let cancel = session.cancel.clone();
            runtime.spawn(async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => debug!("handshake cancelled"),
                    () = supervisor.initialize() => {}
                }
            });
        }

        if let Err(e) = session.channels.open_all(&inner.config.channel_kinds()) {
            session.shutdown();
            return Err(e);
        }

        {
            let bootstrap = session.bootstrap.clone();
            runtime.spawn(async move {
                bootstrap.refresh().await;
            });
        }

        info!(
            session = id,
            channels = session.channels.open_count(),
            "session started"
        );
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    /// End the current session. Returns `false` if none was active.
    ///
    /// Channels are closed and any in-flight refresh is abandoned before
    /// this returns. Safe to call repeatedly.
    pub fn stop(&self) -> bool {
        let Some(session) = self.session_slot().take() else {
            return false;
        };
        session.shutdown();
        info!(session = session.id, "session stopped");
        true
    }

    pub fn is_active(&self) -> bool {
        self.session_slot().is_some()
    }

    // ── Session-scoped accessors ─────────────────────────────────────

    /// The live session. Errors outside `start()`/`stop()`.
    pub fn session(&self) -> Result<Arc<Session>, CoreError> {
        self.session_slot()
            .as_ref()
            .map(Arc::clone)
            .ok_or(CoreError::NoActiveSession)
    }

    pub fn bootstrap(&self) -> Result<BootstrapOrchestrator, CoreError> {
        Ok(self.session()?.bootstrap.clone())
    }

    pub fn channels(&self) -> Result<Arc<ChannelManager>, CoreError> {
        Ok(Arc::clone(&self.session()?.channels))
    }

    /// Current connection status, if this controller exposes it.
    pub fn connection_status(&self) -> Result<ConnectionStatus, CoreError> {
        Ok(self.exposed_supervisor()?.status())
    }

    pub fn watch_connection(&self) -> Result<watch::Receiver<ConnectionStatus>, CoreError> {
        Ok(self.exposed_supervisor()?.watch())
    }

    pub fn active_selection(&self) -> Result<Option<String>, CoreError> {
        Ok(self.session()?.bootstrap.active_selection())
    }

    /// Trigger a bootstrap refresh on the live session.
    pub async fn refresh(&self) -> Result<RefreshOutcome, CoreError> {
        let bootstrap = self.bootstrap()?;
        Ok(bootstrap.refresh().await)
    }

    /// Re-run the connection handshake on the live session.
    pub async fn reconnect(&self) -> Result<(), CoreError> {
        let supervisor = self.session()?.supervisor.clone();
        supervisor.reconnect().await;
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn exposed_supervisor(&self) -> Result<ConnectionSupervisor, CoreError> {
        if !self.inner.config.expose_connection_status {
            return Err(CoreError::ConnectionStatusDisabled);
        }
        Ok(self.session()?.supervisor.clone())
    }

    fn session_slot(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
