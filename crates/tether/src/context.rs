//! Turn config file, profile, and CLI overrides into live clients.

use std::path::PathBuf;
use std::sync::Arc;

use tether_api::{RealtimeClient, ReconnectConfig, RestClient};
use tether_config::{Config, ConnectionSettings, FilePreferences, Profile};
use tether_core::{PreferenceStore, SyncConfig};
use tokio_util::sync::CancellationToken;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Everything a command needs to talk to one project.
pub struct SessionContext {
    pub profile_name: String,
    pub connection: ConnectionSettings,
    pub sync: SyncConfig,
    pub preferences_path: PathBuf,
}

impl SessionContext {
    pub fn resolve(global: &GlobalOpts) -> Result<Self, CliError> {
        let cfg = tether_config::load_config()?;
        Self::from_config(&cfg, global)
    }

    pub fn from_config(cfg: &Config, global: &GlobalOpts) -> Result<Self, CliError> {
        let (profile_name, mut profile) = match cfg.profile(global.profile.as_deref()) {
            Ok((name, profile)) => (name, profile.clone()),
            // A bare --url (plus TETHER_ANON_KEY) is enough without a profile.
            Err(_) if global.url.is_some() && global.profile.is_none() => {
                ("(command line)".to_owned(), Profile::default())
            }
            Err(_) => {
                let name = global
                    .profile
                    .clone()
                    .or_else(|| cfg.default_profile.clone())
                    .unwrap_or_else(|| "default".into());
                return Err(CliError::profile_not_found(
                    cfg,
                    name,
                    &tether_config::config_path(),
                ));
            }
        };

        if let Some(ref url) = global.url {
            profile.url.clone_from(url);
        }
        if global.insecure {
            profile.insecure = Some(true);
        }
        if let Some(timeout) = global.timeout {
            profile.timeout = Some(timeout);
        }

        let connection = tether_config::profile_to_connection(&profile, &profile_name, &cfg.defaults)?;
        let sync = tether_config::profile_to_sync_config(&profile);

        tracing::debug!(
            profile = %profile_name,
            url = %connection.url,
            kinds = sync.kinds.len(),
            "resolved session context"
        );

        Ok(Self {
            profile_name,
            connection,
            sync,
            preferences_path: cfg.preferences_path(),
        })
    }

    pub fn rest_client(&self) -> Result<RestClient, CliError> {
        let conn = &self.connection;
        let client = RestClient::new(conn.url.clone(), conn.credentials.clone(), &conn.transport)?
            .with_rpc_names(conn.listing_rpc.clone(), conn.identity_rpc.clone());
        Ok(client)
    }

    /// Spawn the realtime socket. Must run inside the Tokio runtime.
    pub fn realtime_client(&self, cancel: CancellationToken) -> Result<RealtimeClient, CliError> {
        let conn = &self.connection;
        let ws_url = RealtimeClient::socket_url(&conn.url, &conn.credentials)?;
        Ok(RealtimeClient::connect(
            ws_url,
            conn.credentials.clone(),
            ReconnectConfig::default(),
            cancel,
        ))
    }

    pub fn preferences(&self) -> Result<Arc<dyn PreferenceStore>, CliError> {
        let prefs = FilePreferences::open(&self.preferences_path)
            .map_err(|e| CliError::Core(e.into()))?;
        Ok(Arc::new(prefs))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::LogFormat;

    fn global() -> GlobalOpts {
        GlobalOpts {
            profile: None,
            url: None,
            insecure: false,
            timeout: None,
            log_format: LogFormat::Text,
            verbose: 0,
        }
    }

    fn config_with(profile: Profile) -> Config {
        let mut cfg = Config::default();
        cfg.profiles.insert("default".into(), profile);
        cfg
    }

    #[test]
    fn flags_override_profile() {
        let cfg = config_with(Profile {
            url: "https://abc.example.co".into(),
            anon_key: Some("anon".into()),
            ..Profile::default()
        });
        let mut opts = global();
        opts.url = Some("http://localhost:54321".into());
        opts.timeout = Some(5);

        let ctx = SessionContext::from_config(&cfg, &opts).unwrap();
        assert_eq!(ctx.profile_name, "default");
        assert_eq!(ctx.connection.url.as_str(), "http://localhost:54321/");
        assert_eq!(ctx.connection.transport.timeout.as_secs(), 5);
    }

    #[test]
    fn unknown_profile_lists_available() {
        let cfg = config_with(Profile::default());
        let mut opts = global();
        opts.profile = Some("prod".into());

        let err = SessionContext::from_config(&cfg, &opts).err().unwrap();
        match err {
            CliError::ProfileNotFound {
                name, available, ..
            } => {
                assert_eq!(name, "prod");
                assert_eq!(available, "default");
            }
            other => panic!("expected ProfileNotFound, got {other:?}"),
        }
    }
}
