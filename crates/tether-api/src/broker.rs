//! Realtime broker capability.
//!
//! [`RealtimeBroker`] is the seam between the channel lifecycle logic in
//! `tether-core` and a concrete pub/sub transport. [`RealtimeClient`]
//! implements it over a WebSocket; tests implement it in-process.
//!
//! [`RealtimeClient`]: crate::RealtimeClient

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Error;

// ── Event types ──────────────────────────────────────────────────────

/// Broadcast event type carried on a change channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BroadcastOp {
    Insert,
    Update,
    Delete,
}

impl BroadcastOp {
    pub const ALL: [Self; 3] = [Self::Insert, Self::Update, Self::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for BroadcastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BroadcastOp {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(()),
        }
    }
}

/// Outcome of a channel join, reported asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeStatus {
    Subscribed,
    ChannelError(String),
    Closed,
}

/// Socket-level lifecycle events, independent of any channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
    Error(String),
}

// ── Channel registration ─────────────────────────────────────────────

/// Invoked with the raw broadcast payload for one event type.
pub type BroadcastHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Invoked every time the channel's join status changes.
pub type StatusCallback = Arc<dyn Fn(SubscribeStatus) + Send + Sync>;

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Channel name without the `realtime:` topic prefix.
    pub name: String,
    /// Private channels require the realtime-authorization handshake.
    pub private: bool,
}

/// Opaque reference to a registered channel, used to remove it again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    topic: String,
}

impl ChannelRef {
    pub fn new(name: &str) -> Self {
        Self {
            topic: topic_for(name),
        }
    }

    /// Full wire topic, e.g. `realtime:devices-1718000000000`.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Wire topic for a channel name.
pub fn topic_for(name: &str) -> String {
    format!("realtime:{name}")
}

// ── Capability ───────────────────────────────────────────────────────

/// A pub/sub broker delivering INSERT/UPDATE/DELETE broadcasts per channel.
#[async_trait]
pub trait RealtimeBroker: Send + Sync {
    /// Register `handlers` on the channel and start joining it.
    ///
    /// Must not block on the join: the outcome is delivered through
    /// `on_status`, possibly more than once (e.g. re-joins after reconnect).
    fn subscribe(
        &self,
        spec: ChannelSpec,
        handlers: Vec<(BroadcastOp, BroadcastHandler)>,
        on_status: StatusCallback,
    ) -> ChannelRef;

    /// Stop delivering to the channel and leave it. Fire-and-forget.
    fn remove_channel(&self, channel: &ChannelRef);

    /// Push the current access token to the broker so private channels
    /// start delivering.
    async fn set_auth(&self) -> Result<(), Error>;

    /// Subscribe to socket lifecycle events.
    fn system_events(&self) -> broadcast::Receiver<SystemEvent>;

    /// Whether the underlying connection is currently up.
    fn is_connected(&self) -> bool;
}
