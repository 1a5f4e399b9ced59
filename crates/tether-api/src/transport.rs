// Shared transport configuration for building reqwest::Client instances.
//
// The REST and realtime clients share TLS, timeout, and credential
// settings through this module, avoiding duplicated builder logic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (local development stacks).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")));

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

/// Project key plus the (rotatable) user access token.
///
/// Cheap to clone; clones share the access-token slot, so a token
/// refreshed through one client is seen by every other client built
/// from the same credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    anon_key: SecretString,
    access_token: Arc<ArcSwapOption<SecretString>>,
}

impl Credentials {
    pub fn new(anon_key: SecretString, access_token: Option<SecretString>) -> Self {
        Self {
            anon_key,
            access_token: Arc::new(ArcSwapOption::new(access_token.map(Arc::new))),
        }
    }

    pub fn anon_key(&self) -> &SecretString {
        &self.anon_key
    }

    /// The current access token, if one has been set.
    pub fn access_token(&self) -> Option<Arc<SecretString>> {
        self.access_token.load_full()
    }

    /// Replace the access token (e.g. after an external session refresh).
    pub fn set_access_token(&self, token: Option<SecretString>) {
        self.access_token.store(token.map(Arc::new));
    }

    /// Bearer value for the `Authorization` header: the user token when
    /// present, otherwise the project key.
    pub(crate) fn bearer(&self) -> String {
        match self.access_token() {
            Some(token) => format!("Bearer {}", token.expose_secret()),
            None => format!("Bearer {}", self.anon_key.expose_secret()),
        }
    }
}
