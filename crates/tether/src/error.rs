//! CLI error types with miette diagnostics.
//!
//! Maps config and core failures into user-facing errors with help text.

use std::path::Path;

use miette::Diagnostic;
use thiserror::Error;

use tether_config::{Config, ConfigError};
use tether_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the service: {reason}")]
    #[diagnostic(
        code(tether::connection_failed),
        help(
            "Check that the project URL is correct and the service is up.\n\
             Local stacks with self-signed certificates need --insecure (-k)."
        )
    )]
    ConnectionFailed { reason: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(tether::auth_failed),
        help("Refresh the access token (access_token_env in your profile, or TETHER_ACCESS_TOKEN).")
    )]
    AuthFailed { message: String },

    #[error("No project key configured for profile '{profile}'")]
    #[diagnostic(
        code(tether::no_credentials),
        help("Set anon_key_env in the profile, or export TETHER_ANON_KEY.")
    )]
    NoCredentials { profile: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(tether::profile_not_found),
        help("Available profiles: {available}\nConfig file: {path}")
    )]
    ProfileNotFound {
        name: String,
        available: String,
        path: String,
    },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tether::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(tether::config))]
    Config(ConfigError),

    // ── Runtime ──────────────────────────────────────────────────────

    #[error("Bootstrap failed: {reason}")]
    #[diagnostic(code(tether::bootstrap_failed))]
    BootstrapFailed { reason: String },

    #[error(transparent)]
    #[diagnostic(code(tether::core))]
    Core(CoreError),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(tether::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Unknown profile, listing the ones `cfg` does define.
    pub fn profile_not_found(cfg: &Config, name: String, path: &Path) -> Self {
        let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        Self::ProfileNotFound {
            name,
            available: if names.is_empty() {
                "(none)".into()
            } else {
                names.join(", ")
            },
            path: path.display().to_string(),
        }
    }

    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Validation { .. } | Self::ProfileNotFound { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed { reason },
            other => Self::Core(other),
        }
    }
}

impl From<tether_api::Error> for CliError {
    fn from(err: tether_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        let no_creds: CliError = ConfigError::NoCredentials {
            profile: "default".into(),
        }
        .into();
        assert_eq!(no_creds.exit_code(), exit_code::AUTH);

        let bad_url: CliError = ConfigError::Validation {
            field: "url".into(),
            reason: "nope".into(),
        }
        .into();
        assert_eq!(bad_url.exit_code(), exit_code::USAGE);

        let unreachable: CliError = CoreError::ConnectionFailed {
            reason: "refused".into(),
        }
        .into();
        assert_eq!(unreachable.exit_code(), exit_code::CONNECTION);

        let misuse: CliError = CoreError::NoActiveSession.into();
        assert_eq!(misuse.exit_code(), exit_code::GENERAL);
    }
}
