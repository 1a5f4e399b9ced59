// Wire types for the REST surface.
//
// Bootstrap payloads keep `data` as raw JSON: shape validation is a
// core concern, and a `null` listing must reach the validator intact
// rather than fail deserialization here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The signed-in user as reported by `GET /auth/v1/user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub role: Option<String>,

    /// All remaining fields the auth server sends.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Outcome flag reported by the listing RPC itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    Success,
    Failure,
}

/// Response of the domain listing RPC (bootstrap resource A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingResponse {
    pub status: ListingStatus,

    /// Expected to be an array of records; validated by the caller.
    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(default)]
    pub time_finished: Option<DateTime<Utc>>,

    #[serde(default)]
    pub server_processing_time_ms: Option<f64>,
}

/// Response of the identity RPC (bootstrap resource B).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityResponse {
    #[serde(default)]
    pub data: serde_json::Value,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn listing_keeps_null_data() {
        let resp: ListingResponse =
            serde_json::from_str(r#"{"status":"SUCCESS","data":null}"#).unwrap();
        assert_eq!(resp.status, ListingStatus::Success);
        assert!(resp.data.is_null());
        assert!(resp.server_processing_time_ms.is_none());
    }

    #[test]
    fn listing_parses_timing_fields() {
        let resp: ListingResponse = serde_json::from_str(
            r#"{
                "status": "FAILURE",
                "data": [],
                "time_finished": "2026-03-01T10:00:00Z",
                "server_processing_time_ms": 12.5
            }"#,
        )
        .unwrap();
        assert_eq!(resp.status, ListingStatus::Failure);
        assert_eq!(resp.server_processing_time_ms, Some(12.5));
        assert!(resp.time_finished.is_some());
    }

    #[test]
    fn user_captures_extra_fields() {
        let user: User = serde_json::from_str(
            r#"{"id":"u-1","email":"a@b.c","aud":"authenticated"}"#,
        )
        .unwrap();
        assert_eq!(user.id, "u-1");
        assert_eq!(user.extra["aud"], "authenticated");
    }
}
