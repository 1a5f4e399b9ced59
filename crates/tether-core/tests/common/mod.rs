#![allow(clippy::unwrap_used, dead_code)]
// In-process fakes for the broker, data service and preference store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tether_api::{
    BroadcastHandler, BroadcastOp, ChannelRef, ChannelSpec, DataService, IdentityResponse,
    ListingResponse, ListingStatus, RealtimeBroker, StatusCallback, SubscribeStatus, SystemEvent,
    User,
};
use tether_core::{PreferenceError, PreferenceStore};
use tokio::sync::{Semaphore, broadcast};

// ── Broker ──────────────────────────────────────────────────────────

pub struct Subscription {
    pub spec: ChannelSpec,
    pub handlers: Vec<(BroadcastOp, BroadcastHandler)>,
    pub on_status: StatusCallback,
}

pub struct MockBroker {
    pub subscriptions: Mutex<Vec<Subscription>>,
    pub removed: Mutex<Vec<String>>,
    pub auth_ok: AtomicBool,
    pub auth_calls: AtomicUsize,
    pub system_tx: broadcast::Sender<SystemEvent>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscriptions: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            auth_ok: AtomicBool::new(true),
            auth_calls: AtomicUsize::new(0),
            system_tx: broadcast::channel(16).0,
        })
    }

    /// Handler registered for `op` on the most recent channel named `{base}-…`.
    pub fn handler(&self, base: &str, op: BroadcastOp) -> BroadcastHandler {
        let prefix = format!("{base}-");
        let subs = self.subscriptions.lock().unwrap();
        let sub = subs
            .iter()
            .rev()
            .find(|s| s.spec.name.starts_with(&prefix))
            .unwrap();
        sub.handlers
            .iter()
            .find(|(o, _)| *o == op)
            .map(|(_, h)| Arc::clone(h))
            .unwrap()
    }

    pub fn deliver(&self, base: &str, op: BroadcastOp, payload: Value) {
        let handler = self.handler(base, op);
        handler(payload);
    }

    pub fn report(&self, base: &str, status: SubscribeStatus) {
        let prefix = format!("{base}-");
        let cb = {
            let subs = self.subscriptions.lock().unwrap();
            let sub = subs
                .iter()
                .rev()
                .find(|s| s.spec.name.starts_with(&prefix))
                .unwrap();
            Arc::clone(&sub.on_status)
        };
        cb(status);
    }

    pub fn subscription_names(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.spec.name.clone())
            .collect()
    }
}

#[async_trait]
impl RealtimeBroker for MockBroker {
    fn subscribe(
        &self,
        spec: ChannelSpec,
        handlers: Vec<(BroadcastOp, BroadcastHandler)>,
        on_status: StatusCallback,
    ) -> ChannelRef {
        let channel = ChannelRef::new(&spec.name);
        self.subscriptions.lock().unwrap().push(Subscription {
            spec,
            handlers,
            on_status,
        });
        channel
    }

    fn remove_channel(&self, channel: &ChannelRef) {
        self.removed.lock().unwrap().push(channel.topic().to_owned());
    }

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
        true
    }
}

// ── Data service ────────────────────────────────────────────────────

pub struct MockData {
    pub listing: Mutex<Value>,
    pub listing_status: Mutex<ListingStatus>,
    pub identity: Mutex<Value>,
    pub listing_delay: Duration,
    pub identity_delay: Duration,
    /// When set, each fetch waits for a permit before answering.
    pub gate: Option<Arc<Semaphore>>,
    pub listing_calls: AtomicUsize,
    pub fail_listing: AtomicBool,
}

impl MockData {
    pub fn new(listing: Value) -> Self {
        Self {
            listing: Mutex::new(listing),
            listing_status: Mutex::new(ListingStatus::Success),
            identity: Mutex::new(json!({ "id": "user-1", "display_name": "Ops" })),
            listing_delay: Duration::ZERO,
            identity_delay: Duration::ZERO,
            gate: None,
            listing_calls: AtomicUsize::new(0),
            fail_listing: AtomicBool::new(false),
        }
    }

    pub fn with_delays(mut self, listing: Duration, identity: Duration) -> Self {
        self.listing_delay = listing;
        self.identity_delay = identity;
        self
    }

    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    async fn wait_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
    }
}

#[async_trait]
impl DataService for MockData {
    async fn get_user(&self) -> Result<User, tether_api::Error> {
        Ok(serde_json::from_value(json!({ "id": "user-1" })).unwrap())
    }

    async fn fetch_listing(&self) -> Result<ListingResponse, tether_api::Error> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_gate().await;
        tokio::time::sleep(self.listing_delay).await;
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(tether_api::Error::Rpc {
                function: "get_devices_for_user".into(),
                status: 500,
                message: "boom".into(),
            });
        }
        Ok(ListingResponse {
            status: *self.listing_status.lock().unwrap(),
            data: self.listing.lock().unwrap().clone(),
            time_finished: None,
            server_processing_time_ms: Some(3.5),
        })
    }

    async fn fetch_identity(&self) -> Result<IdentityResponse, tether_api::Error> {
        self.wait_gate().await;
        tokio::time::sleep(self.identity_delay).await;
        Ok(IdentityResponse {
            data: self.identity.lock().unwrap().clone(),
        })
    }
}

// ── Preferences ─────────────────────────────────────────────────────

/// In-memory preferences that count writes.
#[derive(Default)]
pub struct RecordingPrefs {
    pub items: Mutex<std::collections::HashMap<String, String>>,
    pub writes: AtomicUsize,
}

impl RecordingPrefs {
    pub fn seeded(key: &str, value: &str) -> Self {
        let prefs = Self::default();
        prefs
            .items
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
        prefs
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.items.lock().unwrap().get(key).cloned()
    }
}

impl PreferenceStore for RecordingPrefs {
    fn get_item(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self.value(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.items
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Preferences that fail every call.
pub struct BrokenPrefs;

impl PreferenceStore for BrokenPrefs {
    fn get_item(&self, _: &str) -> Result<Option<String>, PreferenceError> {
        Err(PreferenceError::Unavailable("storage disabled".into()))
    }

    fn set_item(&self, _: &str, _: &str) -> Result<(), PreferenceError> {
        Err(PreferenceError::Unavailable("storage disabled".into()))
    }
}
