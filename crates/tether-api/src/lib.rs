//! Async client for the tether remote data service.
//!
//! Two API surfaces, one shared credential set:
//!
//! - **[`RestClient`]**: `reqwest`-based HTTP client for the auth endpoint
//!   (`getUser`) and the two bootstrap RPCs (domain listing + identity).
//!   Implements [`DataService`].
//!
//! - **[`RealtimeClient`]**: WebSocket broadcast broker speaking the Phoenix
//!   channel protocol. Runs a background reconnect loop and re-joins every
//!   registered channel after a drop. Implements [`RealtimeBroker`].
//!
//! The capability traits live in [`broker`] and [`service`] so that
//! `tether-core` can be driven by in-process fakes in tests.

pub mod broker;
pub mod error;
pub mod models;
pub mod realtime;
pub mod rest;
pub mod service;
pub mod transport;

pub use broker::{
    BroadcastHandler, BroadcastOp, ChannelRef, ChannelSpec, RealtimeBroker, StatusCallback,
    SubscribeStatus, SystemEvent,
};
pub use error::Error;
pub use models::{IdentityResponse, ListingResponse, ListingStatus, User};
pub use realtime::{RealtimeClient, ReconnectConfig};
pub use rest::{DEFAULT_IDENTITY_RPC, DEFAULT_LISTING_RPC, RestClient};
pub use service::DataService;
pub use transport::{Credentials, TlsMode, TransportConfig};
