// REST client for auth and RPC endpoints
//
// Wraps `reqwest::Client` with project-key / bearer header injection,
// RPC URL construction, and status-to-error mapping. The two bootstrap
// RPCs are exposed through the `DataService` trait.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::models::{IdentityResponse, ListingResponse, User};
use crate::service::DataService;
use crate::transport::{Credentials, TransportConfig};

/// Listing RPC used when none is configured.
pub const DEFAULT_LISTING_RPC: &str = "get_devices_for_user";
/// Identity RPC used when none is configured.
pub const DEFAULT_IDENTITY_RPC: &str = "get_current_profile";

/// HTTP client for the data service's auth and RPC endpoints.
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    listing_rpc: String,
    identity_rpc: String,
}

impl RestClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the project root (e.g. `https://abc.example.co`);
    /// `/auth/v1` and `/rest/v1` are appended per call.
    pub fn new(
        base_url: Url,
        credentials: Credentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, credentials))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, credentials: Credentials) -> Self {
        Self {
            http,
            base_url: with_trailing_slash(base_url),
            credentials,
            listing_rpc: DEFAULT_LISTING_RPC.into(),
            identity_rpc: DEFAULT_IDENTITY_RPC.into(),
        }
    }

    /// Override the RPC function names used for bootstrap.
    pub fn with_rpc_names(mut self, listing: impl Into<String>, identity: impl Into<String>) -> Self {
        self.listing_rpc = listing.into();
        self.identity_rpc = identity.into();
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", self.credentials.anon_key().expose_secret())
            .header(AUTHORIZATION, self.credentials.bearer())
    }

    /// Call `POST /rest/v1/rpc/{function}` and decode the JSON body.
    pub async fn rpc<T: DeserializeOwned>(
        &self,
        function: &str,
        args: &serde_json::Value,
    ) -> Result<T, Error> {
        let url = self.url(&format!("rest/v1/rpc/{function}"))?;
        debug!(%url, function, "calling RPC");

        let resp = self.authed(self.http.post(url)).json(args).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        trace!(function, %status, bytes = body.len(), "RPC response");

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(Error::Authentication {
                message: format!("RPC {function} rejected: {}", error_message(&body)),
            });
        }
        if !status.is_success() {
            return Err(Error::Rpc {
                function: function.to_owned(),
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        decode(&body)
    }
}

#[async_trait]
impl DataService for RestClient {
    async fn get_user(&self) -> Result<User, Error> {
        if self.credentials.access_token().is_none() {
            return Err(Error::MissingAccessToken);
        }

        let url = self.url("auth/v1/user")?;
        let resp = self.authed(self.http.get(url)).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(Error::Authentication {
                message: error_message(&body),
            });
        }
        if !status.is_success() {
            return Err(Error::Authentication {
                message: format!("unexpected HTTP {status}: {}", error_message(&body)),
            });
        }

        decode(&body)
    }

    async fn fetch_listing(&self) -> Result<ListingResponse, Error> {
        self.rpc(&self.listing_rpc, &serde_json::json!({})).await
    }

    async fn fetch_identity(&self) -> Result<IdentityResponse, Error> {
        self.rpc(&self.identity_rpc, &serde_json::json!({})).await
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    serde_json::from_str(body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: body.to_owned(),
    })
}

/// Pull a human-readable message out of an error body
/// (`{"message": ...}`, `{"msg": ...}`, `{"error_description": ...}`), else the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(String::from))
        })
        .unwrap_or_else(|| body.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_added_once() {
        let url = with_trailing_slash(Url::parse("https://example.co/project").unwrap());
        assert_eq!(url.as_str(), "https://example.co/project/");
        let again = with_trailing_slash(url);
        assert_eq!(again.as_str(), "https://example.co/project/");
    }

    #[test]
    fn error_message_prefers_structured_fields() {
        assert_eq!(error_message(r#"{"message":"bad jwt"}"#), "bad jwt");
        assert_eq!(error_message(r#"{"msg":"expired"}"#), "expired");
        assert_eq!(error_message("plain text"), "plain text");
    }
}
