use thiserror::Error;

/// Top-level error type for the `tether-api` crate.
///
/// Covers every failure mode across both API surfaces:
/// authentication, HTTP transport, RPC, and the realtime socket.
/// `tether-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The auth endpoint rejected the access token (expired, revoked, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// An operation needed a user access token but none is configured.
    #[error("No access token available -- sign in first")]
    MissingAccessToken,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── RPC ─────────────────────────────────────────────────────────
    /// Non-success response from a `/rest/v1/rpc/{function}` call.
    #[error("RPC {function} failed (HTTP {status}): {message}")]
    Rpc {
        function: String,
        status: u16,
        message: String,
    },

    // ── Realtime ────────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The realtime socket is not running (never started or shut down).
    #[error("Realtime socket is not connected")]
    NotConnected,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) | Self::NotConnected => true,
            Self::Rpc { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
