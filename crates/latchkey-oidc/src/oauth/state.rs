//! Client state carried through the `state` parameter.
//!
//! The relying party keeps no server-side record between the authorization
//! redirect and the callback: everything needed to finish the flow travels in
//! the `state` parameter plus two short-lived cookies. [`FlowState`] is the
//! decoded payload of that parameter: a per-request CSRF key, the connection
//! the flow was started for, and an optional post-login redirect target.
//!
//! # Security Considerations
//!
//! The `state` value is attacker-writable: it arrives on a redirect the user
//! agent performs. It is trusted only after the embedded per-request key has
//! been compared against the `request-key` cookie in constant time. The
//! payload is base64url-encoded JSON, not encrypted; nothing secret may be
//! placed in it.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Generate a fresh per-request key for one authorization round trip.
///
/// Uses the system's cryptographically secure random number generator. The
/// key has 256 bits of entropy, encoded as base64url (43 characters).
#[must_use]
pub fn generate_request_key() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Payload of the `state` parameter for one authorization round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowState {
    /// One-time CSRF key, mirrored by the `request-key` cookie.
    pub per_request_key: String,
    /// Connection the flow was started for.
    pub connection_name: String,
    /// Where to send the user once the flow completes.
    #[serde(default)]
    pub redirect: Option<String>,
}

impl FlowState {
    /// Create state for a new flow with a freshly generated request key.
    #[must_use]
    pub fn new(connection_name: impl Into<String>) -> Self {
        Self {
            per_request_key: generate_request_key(),
            connection_name: connection_name.into(),
            redirect: None,
        }
    }

    /// Attach the post-login redirect target.
    #[must_use]
    pub fn with_redirect(mut self, redirect: impl Into<String>) -> Self {
        self.redirect = Some(redirect.into());
        self
    }

    /// Encode for use as the `state` query parameter value.
    ///
    /// The payload is JSON wrapped in base64url without padding, so the
    /// result stays URL-safe regardless of what the redirect target contains.
    #[must_use]
    pub fn encode(&self) -> String {
        let json = serde_json::json!({
            "per_request_key": self.per_request_key,
            "connection_name": self.connection_name,
            "redirect": self.redirect,
        });
        URL_SAFE_NO_PAD.encode(json.to_string())
    }

    /// Decode a `state` parameter returned by the provider.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::ParseError`] when the value is not the base64url
    /// JSON produced by [`FlowState::encode`]. Decode failures are
    /// recoverable: the host should restart the flow rather than fail the
    /// request outright.
    pub fn decode(raw: &str) -> Result<Self, FlowError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.as_bytes())
            .map_err(|_| FlowError::parse("state parameter is not valid base64url"))?;
        let json = String::from_utf8(bytes)
            .map_err(|_| FlowError::parse("state parameter is not valid UTF-8"))?;
        serde_json::from_str(&json)
            .map_err(|_| FlowError::parse("state parameter does not contain client state"))
    }

    /// Compare the embedded per-request key against the value presented in
    /// the `request-key` cookie.
    ///
    /// Uses a constant-time comparison so the check leaks nothing about how
    /// much of the key matched.
    #[must_use]
    pub fn matches_request_key(&self, presented: &str) -> bool {
        constant_time_eq::constant_time_eq(self.per_request_key.as_bytes(), presented.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_shape() {
        let key = generate_request_key();
        assert_eq!(key.len(), 43); // 32 bytes base64url encoded
        assert!(
            key.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_request_key_uniqueness() {
        assert_ne!(generate_request_key(), generate_request_key());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let state = FlowState::new("github").with_redirect("/profile");
        let decoded = FlowState::decode(&state.encode()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_round_trip_without_redirect() {
        let state = FlowState::new("github");
        let decoded = FlowState::decode(&state.encode()).unwrap();
        assert_eq!(decoded.redirect, None);
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_encoded_value_is_url_safe() {
        let state = FlowState::new("github").with_redirect("/a path/with?query=1&x=2");
        let encoded = state.encode();
        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let result = FlowState::decode("not base64url!!!");
        assert!(matches!(result.unwrap_err(), FlowError::ParseError { .. }));
    }

    #[test]
    fn test_decode_rejects_non_json_payload() {
        let encoded = URL_SAFE_NO_PAD.encode("definitely not json");
        let result = FlowState::decode(&encoded);
        assert!(matches!(result.unwrap_err(), FlowError::ParseError { .. }));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let encoded = URL_SAFE_NO_PAD.encode([0xff, 0xfe, 0x80]);
        let result = FlowState::decode(&encoded);
        assert!(matches!(result.unwrap_err(), FlowError::ParseError { .. }));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let encoded = URL_SAFE_NO_PAD.encode(r#"{"per_request_key":"abc"}"#);
        let result = FlowState::decode(&encoded);
        assert!(matches!(result.unwrap_err(), FlowError::ParseError { .. }));
    }

    #[test]
    fn test_blank_connection_name_still_decodes() {
        // A blank connection is a flow-level error, not a parse error; the
        // callback decides what to do with it.
        let state = FlowState::new("");
        let decoded = FlowState::decode(&state.encode()).unwrap();
        assert_eq!(decoded.connection_name, "");
    }

    #[test]
    fn test_request_key_comparison() {
        let state = FlowState::new("github");
        let key = state.per_request_key.clone();
        assert!(state.matches_request_key(&key));
        assert!(!state.matches_request_key("some-other-key"));
        assert!(!state.matches_request_key(""));
    }
}
