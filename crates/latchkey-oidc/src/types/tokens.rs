//! Durable token set.
//!
//! # Security
//!
//! Both token values are secrets. `Debug` output redacts them; stores own the
//! at-rest protection (encryption, access control) for the serialized form.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::oauth::exchange::TokenResponse;

/// The token set a store persists per (connection, identity).
///
/// Written after every successful code exchange or refresh; read back by the
/// lifecycle manager before each protected request. The wire-level
/// `expires_in` is converted to an absolute instant at persist time so reads
/// need no reference point.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTokens {
    /// Access token as issued.
    pub access_token: String,

    /// When the access token expires (None = provider stated no lifetime).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,

    /// Refresh token, when one is held.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl PersistedTokens {
    /// Builds the durable set from a token endpoint response, anchoring
    /// `expires_in` at `now`.
    #[must_use]
    pub fn from_response(response: &TokenResponse, now: OffsetDateTime) -> Self {
        let expires_at = response.expires_in.and_then(|secs| {
            let secs = i64::try_from(secs).ok()?;
            now.checked_add(Duration::seconds(secs))
        });

        Self {
            access_token: response.access_token.clone(),
            expires_at,
            refresh_token: response.refresh_token.clone(),
        }
    }

    /// Keeps a previously stored refresh token when this set has none.
    ///
    /// Providers may omit the refresh token from a refresh response; the
    /// previously issued one remains valid in that case.
    #[must_use]
    pub fn carry_refresh_token(mut self, previous: Option<String>) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous;
        }
        self
    }

    /// Returns `true` if the access token has expired as of `now`.
    #[must_use]
    pub fn access_token_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.map(|exp| now > exp).unwrap_or(false)
    }
}

// Token material stays out of Debug output.
impl fmt::Debug for PersistedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedTokens")
            .field("access_token", &"..")
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| ".."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(expires_in: Option<u64>, refresh_token: Option<&str>) -> TokenResponse {
        let mut body = serde_json::json!({
            "access_token": "at-1",
            "token_type": "Bearer",
        });
        if let Some(expires_in) = expires_in {
            body["expires_in"] = serde_json::json!(expires_in);
        }
        if let Some(refresh_token) = refresh_token {
            body["refresh_token"] = serde_json::json!(refresh_token);
        }
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_from_response_anchors_expiry() {
        let now = OffsetDateTime::now_utc();
        let tokens = PersistedTokens::from_response(&response(Some(3600), Some("rt-1")), now);

        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.expires_at, Some(now + Duration::seconds(3600)));
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
    }

    #[test]
    fn test_from_response_without_lifetime() {
        let now = OffsetDateTime::now_utc();
        let tokens = PersistedTokens::from_response(&response(None, None), now);

        assert!(tokens.expires_at.is_none());
        assert!(tokens.refresh_token.is_none());
        assert!(!tokens.access_token_expired(now + Duration::days(365)));
    }

    #[test]
    fn test_carry_refresh_token() {
        let now = OffsetDateTime::now_utc();

        let carried = PersistedTokens::from_response(&response(Some(60), None), now)
            .carry_refresh_token(Some("rt-old".to_string()));
        assert_eq!(carried.refresh_token.as_deref(), Some("rt-old"));

        let replaced = PersistedTokens::from_response(&response(Some(60), Some("rt-new")), now)
            .carry_refresh_token(Some("rt-old".to_string()));
        assert_eq!(replaced.refresh_token.as_deref(), Some("rt-new"));
    }

    #[test]
    fn test_access_token_expiry_window() {
        let now = OffsetDateTime::now_utc();
        let tokens = PersistedTokens::from_response(&response(Some(600), None), now);

        assert!(!tokens.access_token_expired(now));
        assert!(!tokens.access_token_expired(now + Duration::seconds(599)));
        assert!(tokens.access_token_expired(now + Duration::seconds(601)));
    }

    #[test]
    fn test_serialization_round_trip() {
        let now = OffsetDateTime::now_utc();
        let tokens = PersistedTokens::from_response(&response(Some(3600), Some("rt-1")), now);

        let json = serde_json::to_string(&tokens).unwrap();
        assert!(json.contains("accessToken"));
        assert!(json.contains("expiresAt"));

        let restored: PersistedTokens = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.access_token, tokens.access_token);
        assert_eq!(restored.refresh_token, tokens.refresh_token);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let now = OffsetDateTime::now_utc();
        let tokens = PersistedTokens::from_response(&response(Some(3600), Some("rt-1")), now);

        let rendered = format!("{tokens:?}");
        assert!(!rendered.contains("at-1"));
        assert!(!rendered.contains("rt-1"));
    }
}
