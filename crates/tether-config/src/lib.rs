//! Shared configuration for tether.
//!
//! TOML profiles, credential resolution (env + plaintext), translation to
//! `tether_core::SyncConfig`, and the file-backed preference store. Core
//! never touches disk; everything file-shaped lives here.

mod preferences;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tether_api::{
    Credentials, DEFAULT_IDENTITY_RPC, DEFAULT_LISTING_RPC, TlsMode, TransportConfig,
};
use tether_core::{DEFAULT_SELECTION_KEY, EntityKind, SyncConfig};

pub use preferences::FilePreferences;

/// Env var consulted for the project key when a profile names none.
pub const ANON_KEY_ENV: &str = "TETHER_ANON_KEY";
/// Env var consulted for the user access token when a profile names none.
pub const ACCESS_TOKEN_ENV: &str = "TETHER_ACCESS_TOKEN";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("no project key configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named service profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub insecure: bool,

    /// Where the active selection is persisted. Defaults to the
    /// platform data directory.
    pub preferences_file: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            insecure: false,
            preferences_file: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// A named service profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Project base URL (e.g., "https://abc.example.co").
    pub url: String,

    /// Project (anon) key, plaintext. Prefer `anon_key_env`.
    pub anon_key: Option<String>,

    /// Environment variable holding the project key.
    pub anon_key_env: Option<String>,

    /// User access token, plaintext. Prefer `access_token_env`.
    pub access_token: Option<String>,

    /// Environment variable holding the user access token.
    pub access_token_env: Option<String>,

    /// RPC returning the domain listing.
    pub listing_rpc: Option<String>,

    /// RPC returning the current identity/profile.
    pub identity_rpc: Option<String>,

    /// Entity kinds to subscribe to (default: all).
    pub kinds: Option<Vec<EntityKind>>,

    /// Preference key for the active selection.
    pub selection_key: Option<String>,

    /// Subscribe to private channels (default: true).
    pub private_channels: Option<bool>,

    /// Expose connection status to callers (default: true).
    pub expose_connection_status: Option<bool>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "tether", "tether")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the preference file.
pub fn default_preferences_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("preferences.json"),
        |dirs| dirs.data_dir().join("preferences.json"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("tether");
    p
}

// ── Loading / saving ────────────────────────────────────────────────

/// Load the Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the Config from `path` + environment.
///
/// Env vars use a `TETHER_` prefix with `__` as the nesting separator,
/// e.g. `TETHER_PROFILES__PROD__URL`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TETHER_").split("__"));

    Ok(figment.extract()?)
}

/// Load only what is written in the file at `path`, ignoring the
/// environment. Used before rewriting the file so env overrides are
/// never persisted.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path));

    Ok(figment.extract()?)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Make `name` the default profile in the config file at `path`.
pub fn set_default_profile(path: &Path, name: &str) -> Result<(), ConfigError> {
    let mut cfg = load_config_file(path)?;
    if !cfg.profiles.contains_key(name) {
        return Err(ConfigError::UnknownProfile {
            profile: name.into(),
        });
    }
    cfg.default_profile = Some(name.into());
    save_config_to(&cfg, path)?;
    tracing::info!(profile = name, path = %path.display(), "default profile updated");
    Ok(())
}

impl Config {
    /// Pick a profile by explicit name, else the default profile.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());
        let profile = self
            .profiles
            .get(&name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.clone(),
            })?;
        Ok((name, profile))
    }

    /// Preference file path, honouring the override in `[defaults]`.
    pub fn preferences_path(&self) -> PathBuf {
        self.defaults
            .preferences_file
            .clone()
            .unwrap_or_else(default_preferences_path)
    }
}

// ── Credential resolution ───────────────────────────────────────────

fn from_env_or_plain(
    env_name: Option<&str>,
    fallback_env: &str,
    plain: Option<&String>,
) -> Option<SecretString> {
    if let Some(env_name) = env_name {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }
    if let Some(val) = plain {
        return Some(SecretString::from(val.clone()));
    }
    std::env::var(fallback_env).ok().map(SecretString::from)
}

/// Resolve the project key: named env var, then plaintext, then `TETHER_ANON_KEY`.
pub fn resolve_anon_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    from_env_or_plain(
        profile.anon_key_env.as_deref(),
        ANON_KEY_ENV,
        profile.anon_key.as_ref(),
    )
    .ok_or_else(|| ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Resolve the user access token, if any. Without one the session runs
/// with the project key only and private channels stay silent.
pub fn resolve_access_token(profile: &Profile) -> Option<SecretString> {
    from_env_or_plain(
        profile.access_token_env.as_deref(),
        ACCESS_TOKEN_ENV,
        profile.access_token.as_ref(),
    )
}

// ── Translation ─────────────────────────────────────────────────────

/// Everything needed to build the REST and realtime clients.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub url: url::Url,
    pub credentials: Credentials,
    pub transport: TransportConfig,
    pub listing_rpc: String,
    pub identity_rpc: String,
}

/// Resolve URL, credentials and transport settings for a profile.
pub fn profile_to_connection(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ConnectionSettings, ConfigError> {
    let url: url::Url = profile.url.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", profile.url),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "url".into(),
            reason: format!("expected http(s) URL, got {}", url.scheme()),
        });
    }

    let credentials = Credentials::new(
        resolve_anon_key(profile, profile_name)?,
        resolve_access_token(profile),
    );

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    Ok(ConnectionSettings {
        url,
        credentials,
        transport: TransportConfig {
            tls,
            timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        },
        listing_rpc: profile
            .listing_rpc
            .clone()
            .unwrap_or_else(|| DEFAULT_LISTING_RPC.into()),
        identity_rpc: profile
            .identity_rpc
            .clone()
            .unwrap_or_else(|| DEFAULT_IDENTITY_RPC.into()),
    })
}

/// Build the runtime `SyncConfig` for a profile.
pub fn profile_to_sync_config(profile: &Profile) -> SyncConfig {
    let defaults = SyncConfig::default();
    SyncConfig {
        kinds: profile.kinds.clone().unwrap_or(defaults.kinds),
        listing_kind: defaults.listing_kind,
        selection_key: profile
            .selection_key
            .clone()
            .unwrap_or_else(|| DEFAULT_SELECTION_KEY.into()),
        private_channels: profile.private_channels.unwrap_or(defaults.private_channels),
        expose_connection_status: profile
            .expose_connection_status
            .unwrap_or(defaults.expose_connection_status),
    }
}
