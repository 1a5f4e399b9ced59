// ── Core error types ──
//
// Errors surfaced by tether-core. Data-path failures (malformed events,
// bootstrap validation, preference outages) are absorbed into state and
// never reach callers as `CoreError`; what remains is session misuse plus
// the translated transport errors returned by explicit API calls.

use thiserror::Error;

use crate::model::EntityKind;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session misuse ───────────────────────────────────────────────
    #[error("No active session -- call Controller::start() first")]
    NoActiveSession,

    #[error("A session is already active -- call Controller::stop() first")]
    SessionAlreadyActive,

    #[error("Channel for {kind} is already open in this session")]
    ChannelAlreadyOpen { kind: EntityKind },

    #[error("Connection status is not exposed by this controller")]
    ConnectionStatusDisabled,

    // ── Remote errors ────────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Local errors ─────────────────────────────────────────────────
    #[error("Preference store error: {0}")]
    Preference(#[from] PreferenceError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Failure reported by a [`PreferenceStore`](crate::PreferenceStore).
#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("Preference store unavailable: {0}")]
    Unavailable(String),

    #[error("Preference store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Preference store is corrupt: {0}")]
    Corrupt(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<tether_api::Error> for CoreError {
    fn from(err: tether_api::Error) -> Self {
        match err {
            tether_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            tether_api::Error::MissingAccessToken => CoreError::AuthenticationFailed {
                message: "no access token configured".into(),
            },
            tether_api::Error::Transport(ref e) => {
                if e.is_connect() || e.is_timeout() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            tether_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            tether_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            tether_api::Error::Rpc {
                function,
                status,
                message,
            } => CoreError::Api {
                message: format!("{function}: {message}"),
                status: Some(status),
            },
            tether_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                reason: format!("WebSocket connection failed: {reason}"),
            },
            tether_api::Error::NotConnected => CoreError::ConnectionFailed {
                reason: "realtime socket is not connected".into(),
            },
            tether_api::Error::Deserialization { message, body: _ } => CoreError::Api {
                message: format!("Deserialization error: {message}"),
                status: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_keeps_status() {
        let err: CoreError = tether_api::Error::Rpc {
            function: "list".into(),
            status: 502,
            message: "bad gateway".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Api { status: Some(502), .. }));
    }

    #[test]
    fn missing_token_is_auth_failure() {
        let err: CoreError = tether_api::Error::MissingAccessToken.into();
        assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    }
}
