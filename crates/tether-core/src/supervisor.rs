// ── Connection supervision ──
//
// Runs the pre-subscription handshake, mirrors broker lifecycle events
// into an observable ConnectionStatus, and exposes a manual reconnect.

use std::sync::{Arc, Mutex, PoisonError};

use tether_api::{DataService, RealtimeBroker, SystemEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::telemetry::MetricsSink;

/// Observable connection state. Written only by the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub last_error: Option<String>,
    pub retry_count: u32,
    /// Set when the realtime-authorization handshake failed; channels may
    /// be subscribed but receive nothing until a later handshake succeeds.
    pub degraded: bool,
}

impl ConnectionStatus {
    pub fn is_healthy(&self) -> bool {
        self.is_connected && !self.degraded
    }
}

/// Supervises the realtime connection for one session.
///
/// Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    broker: Arc<dyn RealtimeBroker>,
    data: Arc<dyn DataService>,
    metrics: Arc<dyn MetricsSink>,
    status: watch::Sender<ConnectionStatus>,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
    handshake: tokio::sync::Mutex<()>,
}

impl ConnectionSupervisor {
    pub fn new(
        broker: Arc<dyn RealtimeBroker>,
        data: Arc<dyn DataService>,
        metrics: Arc<dyn MetricsSink>,
        cancel: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            inner: Arc::new(SupervisorInner {
                broker,
                data,
                metrics,
                status,
                cancel,
                listener: Mutex::new(None),
                handshake: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch connection status changes.
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Start mirroring broker system events into the status.
    ///
    /// Subscribes synchronously so no event emitted after this call is
    /// missed. Calling it again is a no-op. Must run inside a Tokio runtime.
    pub fn listen(&self) {
        let mut listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }

        let mut events = self.inner.broker.system_events();
        let connected = self.inner.broker.is_connected();
        self.update(|s| s.is_connected = connected);

        let supervisor = self.clone();
        let cancel = self.inner.cancel.clone();
        *listener = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => supervisor.on_system_event(event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "system event listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("system event listener stopped");
        }));
    }

    /// Identity check, then the realtime-authorization handshake.
    ///
    /// Neither step fails the call: an identity failure is logged, a
    /// handshake failure marks the status degraded.
    pub async fn initialize(&self) {
        self.listen();

        match self.inner.data.get_user().await {
            Ok(user) => debug!(user_id = %user.id, "identity check passed"),
            Err(e) => warn!(error = %e, "identity check failed (continuing)"),
        }

        self.handshake().await;
    }

    /// Re-run the handshake. A no-op when the connection is healthy.
    pub async fn reconnect(&self) {
        if self.status().is_healthy() {
            debug!("reconnect requested while healthy, nothing to do");
            return;
        }
        self.update(|s| s.retry_count = s.retry_count.saturating_add(1));
        info!(retries = self.status().retry_count, "manual reconnect");
        self.handshake().await;
    }

    /// Stop the system-event listener.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn handshake(&self) {
        let _guard = self.inner.handshake.lock().await;

        match self.inner.broker.set_auth().await {
            Ok(()) => {
                debug!("realtime authorization accepted");
                self.update(|s| {
                    s.degraded = false;
                    s.last_error = None;
                });
            }
            Err(e) => {
                warn!(error = %e, "realtime authorization failed, channels may stay silent");
                self.update(|s| {
                    s.degraded = true;
                    s.last_error = Some(e.to_string());
                });
            }
        }
    }

    fn on_system_event(&self, event: SystemEvent) {
        match event {
            SystemEvent::Connected => self.update(|s| {
                s.is_connected = true;
                s.is_connecting = false;
            }),
            SystemEvent::Disconnected => self.update(|s| {
                s.is_connected = false;
            }),
            SystemEvent::Reconnecting { attempt } => {
                debug!(attempt, "broker reconnecting");
                self.update(|s| {
                    s.is_connecting = true;
                    s.retry_count = s.retry_count.saturating_add(1);
                });
            }
            SystemEvent::Error(message) => self.update(|s| {
                s.last_error = Some(message);
            }),
        }
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionStatus)) {
        let changed = self.inner.status.send_if_modified(|status| {
            let before = status.clone();
            f(status);
            *status != before
        });
        if changed {
            self.inner
                .metrics
                .connection_status(&self.inner.status.borrow());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::telemetry::TracingMetrics;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tether_api::{
        BroadcastHandler, BroadcastOp, ChannelRef, ChannelSpec, IdentityResponse,
        ListingResponse, StatusCallback, User,
    };
    use tokio::sync::broadcast;

    struct Broker {
        auth_ok: AtomicBool,
        auth_calls: AtomicUsize,
        system_tx: broadcast::Sender<SystemEvent>,
    }

    #[async_trait]
    impl RealtimeBroker for Broker {
        fn subscribe(
            &self,
            spec: ChannelSpec,
            _: Vec<(BroadcastOp, BroadcastHandler)>,
            _: StatusCallback,
        ) -> ChannelRef {
            ChannelRef::new(&spec.name)
        }

        fn remove_channel(&self, _: &ChannelRef) {}

        async fn set_auth(&self) -> Result<(), tether_api::Error> {
            self.auth_calls.fetch_add(1, Ordering::SeqCst);
            if self.auth_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(tether_api::Error::MissingAccessToken)
            }
        }

        fn system_events(&self) -> broadcast::Receiver<SystemEvent> {
            self.system_tx.subscribe()
        }

        fn is_connected(&self) -> bool {
            false
        }
    }

    struct Data;

    #[async_trait]
    impl DataService for Data {
        async fn get_user(&self) -> Result<User, tether_api::Error> {
            Err(tether_api::Error::Authentication {
                message: "expired".into(),
            })
        }

        async fn fetch_listing(&self) -> Result<ListingResponse, tether_api::Error> {
            Err(tether_api::Error::NotConnected)
        }

        async fn fetch_identity(&self) -> Result<IdentityResponse, tether_api::Error> {
            Err(tether_api::Error::NotConnected)
        }
    }

    fn setup(auth_ok: bool) -> (Arc<Broker>, ConnectionSupervisor) {
        let broker = Arc::new(Broker {
            auth_ok: AtomicBool::new(auth_ok),
            auth_calls: AtomicUsize::new(0),
            system_tx: broadcast::channel(16).0,
        });
        let supervisor = ConnectionSupervisor::new(
            broker.clone(),
            Arc::new(Data),
            Arc::new(TracingMetrics::new()),
            CancellationToken::new(),
        );
        (broker, supervisor)
    }

    async fn wait_for(
        supervisor: &ConnectionSupervisor,
        pred: impl Fn(&ConnectionStatus) -> bool,
    ) -> ConnectionStatus {
        let mut rx = supervisor.watch();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| pred(s)))
            .await
            .unwrap()
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn failed_identity_check_does_not_degrade() {
        let (_, supervisor) = setup(true);
        supervisor.initialize().await;
        let status = supervisor.status();
        assert!(!status.degraded);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn failed_handshake_marks_degraded() {
        let (_, supervisor) = setup(false);
        supervisor.initialize().await;
        let status = supervisor.status();
        assert!(status.degraded);
        assert!(!status.is_connecting);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn system_events_update_status() {
        let (broker, supervisor) = setup(true);
        supervisor.listen();

        broker.system_tx.send(SystemEvent::Connected).unwrap();
        wait_for(&supervisor, |s| s.is_connected).await;

        broker.system_tx.send(SystemEvent::Disconnected).unwrap();
        broker.system_tx.send(SystemEvent::Reconnecting { attempt: 1 }).unwrap();
        broker.system_tx.send(SystemEvent::Reconnecting { attempt: 2 }).unwrap();
        let status = wait_for(&supervisor, |s| s.retry_count == 2).await;
        assert!(!status.is_connected);
        assert!(status.is_connecting);

        broker.system_tx.send(SystemEvent::Error("boom".into())).unwrap();
        let status = wait_for(&supervisor, |s| s.last_error.is_some()).await;
        assert_eq!(status.last_error.as_deref(), Some("boom"));
        supervisor.stop();
    }

    #[tokio::test]
    async fn reconnect_when_healthy_is_noop() {
        let (broker, supervisor) = setup(true);
        supervisor.initialize().await;
        broker.system_tx.send(SystemEvent::Connected).unwrap();
        wait_for(&supervisor, |s| s.is_connected).await;

        let calls = broker.auth_calls.load(Ordering::SeqCst);
        supervisor.reconnect().await;
        assert_eq!(broker.auth_calls.load(Ordering::SeqCst), calls);
        assert_eq!(supervisor.status().retry_count, 0);
    }

    #[tokio::test]
    async fn reconnect_when_degraded_retries_handshake() {
        let (broker, supervisor) = setup(false);
        supervisor.initialize().await;
        assert!(supervisor.status().degraded);

        broker.auth_ok.store(true, Ordering::SeqCst);
        supervisor.reconnect().await;

        let status = supervisor.status();
        assert!(!status.degraded);
        assert_eq!(status.retry_count, 1);
        assert_eq!(broker.auth_calls.load(Ordering::SeqCst), 2);
    }
}
