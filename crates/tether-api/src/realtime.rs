//! Realtime broadcast broker over WebSocket, with auto-reconnect.
//!
//! Speaks the Phoenix channel JSON protocol used by the data service's
//! realtime endpoint. A background task owns the socket: it joins every
//! registered channel, forwards `broadcast` frames to the registered
//! handlers, keeps the connection alive with heartbeats, and reconnects
//! with exponential backoff + jitter when the socket drops.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_api::{RealtimeClient, ReconnectConfig, RealtimeBroker, ChannelSpec, BroadcastOp};
//! use tokio_util::sync::CancellationToken;
//!
//! let url = RealtimeClient::socket_url(&base_url, &credentials)?;
//! let client = RealtimeClient::connect(url, credentials, ReconnectConfig::default(), CancellationToken::new());
//!
//! client.subscribe(
//!     ChannelSpec { name: "devices-1718000000000".into(), private: true },
//!     vec![(BroadcastOp::Insert, Arc::new(|payload| println!("{payload}")))],
//!     Arc::new(|status| println!("{status:?}")),
//! );
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::broker::{
    BroadcastHandler, BroadcastOp, ChannelRef, ChannelSpec, RealtimeBroker, StatusCallback,
    SubscribeStatus, SystemEvent, topic_for,
};
use crate::error::Error;
use crate::transport::Credentials;

// ── Protocol constants ───────────────────────────────────────────────

const SYSTEM_CHANNEL_CAPACITY: usize = 64;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const PHOENIX_TOPIC: &str = "phoenix";
const PROTOCOL_VSN: &str = "1.0.0";

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for socket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── Channel registry ─────────────────────────────────────────────────

struct ChannelEntry {
    spec: ChannelSpec,
    handlers: Vec<(BroadcastOp, BroadcastHandler)>,
    on_status: StatusCallback,
    join_ref: Mutex<Option<String>>,
}

impl ChannelEntry {
    fn current_join_ref(&self) -> Option<String> {
        self.join_ref.lock().ok().and_then(|r| r.clone())
    }

    fn set_join_ref(&self, r: String) {
        if let Ok(mut slot) = self.join_ref.lock() {
            *slot = Some(r);
        }
    }

    /// Forward a `broadcast` frame payload (`{event, payload}`) to the
    /// handlers registered for its event type.
    fn dispatch(&self, payload: &serde_json::Value) {
        let Some(op) = payload
            .get("event")
            .and_then(serde_json::Value::as_str)
            .and_then(|e| e.parse::<BroadcastOp>().ok())
        else {
            debug!(channel = %self.spec.name, "broadcast without a change event type, ignoring");
            return;
        };

        let body = payload.get("payload").cloned().unwrap_or_default();
        for (_, handler) in self.handlers.iter().filter(|(h_op, _)| *h_op == op) {
            handler(body.clone());
        }
    }
}

/// State shared between the client handle and the socket task.
struct Shared {
    channels: DashMap<String, Arc<ChannelEntry>>,
    credentials: Credentials,
    system_tx: broadcast::Sender<SystemEvent>,
    next_ref: AtomicU64,
    connected: AtomicBool,
}

impl Shared {
    fn new(credentials: Credentials) -> Self {
        let (system_tx, _) = broadcast::channel(SYSTEM_CHANNEL_CAPACITY);
        Self {
            channels: DashMap::new(),
            credentials,
            system_tx,
            next_ref: AtomicU64::new(1),
            connected: AtomicBool::new(false),
        }
    }

    fn make_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn emit(&self, event: SystemEvent) {
        // No receivers is fine -- nobody is watching the socket yet.
        let _ = self.system_tx.send(event);
    }

    fn access_token(&self) -> Option<String> {
        self.credentials
            .access_token()
            .map(|t| t.expose_secret().to_owned())
    }

    /// Build a `phx_join` frame for a registered topic, recording its join ref.
    fn join_frame(&self, topic: &str) -> Option<String> {
        let entry = self.channels.get(topic).map(|e| Arc::clone(e.value()))?;
        let join_ref = self.make_ref();
        entry.set_join_ref(join_ref.clone());

        let mut payload = json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [],
                "private": entry.spec.private,
            }
        });
        if let Some(token) = self.access_token() {
            payload["access_token"] = json!(token);
        }

        Some(
            json!({
                "topic": topic,
                "event": "phx_join",
                "payload": payload,
                "ref": join_ref,
                "join_ref": join_ref,
            })
            .to_string(),
        )
    }

    fn leave_frame(&self, topic: &str, join_ref: Option<&str>) -> String {
        json!({
            "topic": topic,
            "event": "phx_leave",
            "payload": {},
            "ref": self.make_ref(),
            "join_ref": join_ref,
        })
        .to_string()
    }

    fn access_token_frame(&self, topic: &str, token: &str) -> String {
        json!({
            "topic": topic,
            "event": "access_token",
            "payload": { "access_token": token },
            "ref": self.make_ref(),
        })
        .to_string()
    }

    fn heartbeat_frame(&self) -> String {
        json!({
            "topic": PHOENIX_TOPIC,
            "event": "heartbeat",
            "payload": {},
            "ref": self.make_ref(),
        })
        .to_string()
    }

    /// Route one inbound text frame.
    fn handle_text(&self, text: &str) {
        let frame: PhxFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "failed to parse realtime frame");
                return;
            }
        };

        if frame.topic == PHOENIX_TOPIC {
            trace!(event = %frame.event, "heartbeat reply");
            return;
        }

        let Some(entry) = self.channels.get(&frame.topic).map(|e| Arc::clone(e.value())) else {
            trace!(topic = %frame.topic, event = %frame.event, "frame for unregistered topic");
            return;
        };

        match frame.event.as_str() {
            "phx_reply" => {
                if frame.msg_ref.is_none() || frame.msg_ref != entry.current_join_ref() {
                    return;
                }
                let status = match frame.payload.get("status").and_then(|s| s.as_str()) {
                    Some("ok") => SubscribeStatus::Subscribed,
                    _ => SubscribeStatus::ChannelError(reply_reason(&frame.payload)),
                };
                (entry.on_status)(status);
            }
            "broadcast" => entry.dispatch(&frame.payload),
            "phx_error" => {
                (entry.on_status)(SubscribeStatus::ChannelError("channel crashed".into()));
            }
            "phx_close" => (entry.on_status)(SubscribeStatus::Closed),
            "system" => {
                if frame.payload.get("status").and_then(|s| s.as_str()) == Some("error") {
                    (entry.on_status)(SubscribeStatus::ChannelError(reply_reason(&frame.payload)));
                } else {
                    debug!(topic = %frame.topic, payload = %frame.payload, "system message");
                }
            }
            other => trace!(topic = %frame.topic, event = other, "unhandled frame"),
        }
    }
}

/// Raw frame shape: `{ topic, event, payload, ref, join_ref }`.
#[derive(Debug, Deserialize)]
struct PhxFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    msg_ref: Option<String>,
}

fn reply_reason(payload: &serde_json::Value) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .and_then(|r| r.as_str())
        .unwrap_or("join rejected")
        .to_owned()
}

// ── RealtimeClient ───────────────────────────────────────────────────

enum Outbound {
    Join(String),
    Leave {
        topic: String,
        join_ref: Option<String>,
    },
    AccessToken,
}

/// Handle to a running realtime socket.
///
/// Created once per session and shared behind an `Arc`. Dropping the
/// handle (or calling [`shutdown`](Self::shutdown)) stops the socket task.
pub struct RealtimeClient {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
}

impl RealtimeClient {
    /// Spawn the socket task and return immediately.
    ///
    /// The first connection attempt happens asynchronously; channels may be
    /// subscribed right away and are joined as soon as the socket is up.
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        ws_url: Url,
        credentials: Credentials,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared::new(credentials));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let task_shared = Arc::clone(&shared);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(ws_url, task_shared, outbound_rx, reconnect, task_cancel).await;
        });

        Self {
            shared,
            outbound,
            cancel,
        }
    }

    /// Derive the socket URL from the project base URL:
    /// `https://host` becomes `wss://host/realtime/v1/websocket?apikey=…&vsn=1.0.0`.
    pub fn socket_url(base: &Url, credentials: &Credentials) -> Result<Url, Error> {
        let mut url = base.join("realtime/v1/websocket")?;
        let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| Error::WebSocketConnect(format!("cannot derive {scheme} URL from {base}")))?;
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", credentials.anon_key().expose_secret())
            .append_pair("vsn", PROTOCOL_VSN);
        Ok(url)
    }

    /// Signal the socket task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl RealtimeBroker for RealtimeClient {
    fn subscribe(
        &self,
        spec: ChannelSpec,
        handlers: Vec<(BroadcastOp, BroadcastHandler)>,
        on_status: StatusCallback,
    ) -> ChannelRef {
        let channel = ChannelRef::new(&spec.name);
        let topic = channel.topic().to_owned();

        let entry = Arc::new(ChannelEntry {
            spec,
            handlers,
            on_status: Arc::clone(&on_status),
            join_ref: Mutex::new(None),
        });
        if self.shared.channels.insert(topic.clone(), entry).is_some() {
            warn!(%topic, "channel re-registered, previous handlers replaced");
        }

        if self.outbound.send(Outbound::Join(topic)).is_err() {
            on_status(SubscribeStatus::ChannelError("realtime socket is shut down".into()));
        }
        channel
    }

    fn remove_channel(&self, channel: &ChannelRef) {
        let Some((topic, entry)) = self.shared.channels.remove(channel.topic()) else {
            return;
        };
        let join_ref = entry.current_join_ref();
        let _ = self.outbound.send(Outbound::Leave { topic, join_ref });
    }

    async fn set_auth(&self) -> Result<(), Error> {
        if self.shared.credentials.access_token().is_none() {
            return Err(Error::MissingAccessToken);
        }
        self.outbound
            .send(Outbound::AccessToken)
            .map_err(|_| Error::NotConnected)
    }

    fn system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.shared.system_tx.subscribe()
    }

    /// Whether the socket is currently open.
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on drop, backoff → reconnect.
async fn ws_loop(
    ws_url: Url,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&ws_url, &shared, &mut outbound, &cancel) => result,
        };

        if shared.connected.swap(false, Ordering::AcqRel) {
            shared.emit(SystemEvent::Disconnected);
        }
        if cancel.is_cancelled() {
            break;
        }

        match result {
            // Clean close (server close frame or stream ended).
            Ok(()) => {
                info!("realtime socket closed cleanly, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                warn!(error = %e, attempt, "realtime socket error");
                shared.emit(SystemEvent::Error(e.to_string()));

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        error!(max_retries = max, "realtime reconnection limit reached, giving up");
                        break;
                    }
                }
            }
        }

        let delay = calculate_backoff(attempt, &reconnect);
        attempt = attempt.saturating_add(1);
        shared.emit(SystemEvent::Reconnecting { attempt });
        debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), attempt, "waiting before reconnect");

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    debug!("realtime loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Open one socket, join every registered channel, and pump frames until it drops.
async fn connect_and_read(
    url: &Url,
    shared: &Shared,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    info!(host = url.host_str().unwrap_or_default(), "connecting realtime socket");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();
    shared.connected.store(true, Ordering::Release);
    shared.emit(SystemEvent::Connected);
    info!("realtime socket connected");

    // Re-join everything registered so far (first connect or after a drop).
    let mut joined: HashSet<String> = HashSet::new();
    let topics: Vec<String> = shared.channels.iter().map(|e| e.key().clone()).collect();
    for topic in topics {
        if let Some(frame) = shared.join_frame(&topic) {
            send(&mut write, frame).await?;
            joined.insert(topic);
        }
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            cmd = outbound.recv() => {
                let Some(cmd) = cmd else { return Ok(()) };
                match cmd {
                    Outbound::Join(topic) => {
                        if joined.insert(topic.clone()) {
                            if let Some(frame) = shared.join_frame(&topic) {
                                send(&mut write, frame).await?;
                            }
                        }
                    }
                    Outbound::Leave { topic, join_ref } => {
                        if joined.remove(&topic) {
                            let frame = shared.leave_frame(&topic, join_ref.as_deref());
                            send(&mut write, frame).await?;
                        }
                    }
                    Outbound::AccessToken => {
                        if let Some(token) = shared.access_token() {
                            for topic in &joined {
                                send(&mut write, shared.access_token_frame(topic, &token)).await?;
                            }
                        }
                    }
                }
            }
            _ = heartbeat.tick() => {
                send(&mut write, shared.heartbeat_frame()).await?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => shared.handle_text(&text),
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            info!(code = %cf.code, reason = %cf.reason, "realtime close frame received");
                        } else {
                            info!("realtime close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        info!("realtime stream ended");
                        return Ok(());
                    }
                    // Binary, Ping, Pong, Frame -- tungstenite answers pings itself
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn send<S>(write: &mut S, frame: String) -> Result<(), Error>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    write
        .send(Message::Text(frame.into()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
#[allow(clippy::cast_precision_loss, clippy::as_conversions, clippy::cast_possible_wrap)]
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exp = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exp);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
