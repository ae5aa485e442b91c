//! Flow cookies for the stateless authorization round trip.
//!
//! Two short-lived cookies carry per-flow material from the authorization
//! redirect to the callback: `request-key` mirrors the CSRF key embedded in
//! the `state` parameter (double-submit defense), and `code-verifier` carries
//! the PKCE verifier when PKCE is enabled. Both are one-time values scoped to
//! a single authorization attempt.
//!
//! The host owns the HTTP layer. Staged cookies are handed out as
//! [`cookie::Cookie`] values for the host to serialize into `Set-Cookie`
//! headers (use [`Cookie::encoded`] for that), and inbound cookies are read
//! from the raw `Cookie` request header via [`FlowCookies::parse`].
//!
//! # Security Considerations
//!
//! Flow cookies are `HttpOnly` (out of reach of page scripts), `Secure`,
//! `SameSite=Lax`, and expire after [`COOKIE_MAX_AGE_SECONDS`]. They are not
//! actively cleared after a callback; the max-age bounds their exposure, and
//! a replayed callback fails at the provider because the code is single-use.

use cookie::{Cookie, SameSite};
use time::Duration;

use crate::error::FlowError;
use crate::oauth::pkce::PkceVerifier;

/// Cookie mirroring the per-request key embedded in `state`.
pub const REQUEST_KEY_COOKIE: &str = "request-key";

/// Cookie carrying the PKCE verifier between redirect and callback.
pub const CODE_VERIFIER_COOKIE: &str = "code-verifier";

/// How long a flow cookie stays valid. Generous enough for a login form and
/// a consent screen, short enough that an abandoned attempt expires.
pub const COOKIE_MAX_AGE_SECONDS: i64 = 300;

/// Create the `request-key` cookie for a new authorization attempt.
#[must_use]
pub fn create_request_key_cookie(value: impl Into<String>) -> Cookie<'static> {
    build_flow_cookie(REQUEST_KEY_COOKIE, value.into())
}

/// Create the `code-verifier` cookie for a new authorization attempt.
#[must_use]
pub fn create_code_verifier_cookie(value: impl Into<String>) -> Cookie<'static> {
    build_flow_cookie(CODE_VERIFIER_COOKIE, value.into())
}

fn build_flow_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::seconds(COOKIE_MAX_AGE_SECONDS))
        .build()
}

/// Values of the flow cookies presented on a callback request.
#[derive(Debug, Clone, Default)]
pub struct FlowCookies {
    request_key: Option<String>,
    code_verifier: Option<String>,
}

impl FlowCookies {
    /// Build from values the host has already extracted.
    #[must_use]
    pub fn new(request_key: Option<String>, code_verifier: Option<String>) -> Self {
        Self {
            request_key,
            code_verifier,
        }
    }

    /// Extract the flow cookies from a raw `Cookie` request header.
    ///
    /// Unknown cookies and malformed segments are ignored. When a cookie
    /// appears more than once the first occurrence wins, matching servlet
    /// style lookup.
    #[must_use]
    pub fn parse(header: &str) -> Self {
        let mut cookies = Self::default();
        for cookie in Cookie::split_parse_encoded(header).flatten() {
            match cookie.name() {
                REQUEST_KEY_COOKIE if cookies.request_key.is_none() => {
                    cookies.request_key = Some(cookie.value().to_string());
                }
                CODE_VERIFIER_COOKIE if cookies.code_verifier.is_none() => {
                    cookies.code_verifier = Some(cookie.value().to_string());
                }
                _ => {}
            }
        }
        cookies
    }

    /// Value of the `request-key` cookie, if presented.
    #[must_use]
    pub fn request_key(&self) -> Option<&str> {
        self.request_key.as_deref()
    }

    /// Value of the `code-verifier` cookie, if presented.
    #[must_use]
    pub fn code_verifier(&self) -> Option<&str> {
        self.code_verifier.as_deref()
    }

    /// The `request-key` cookie value, required for every callback.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::MissingCookie`] when the cookie is absent.
    pub fn require_request_key(&self) -> Result<&str, FlowError> {
        self.request_key().ok_or(FlowError::MissingCookie)
    }

    /// The PKCE verifier, required when PKCE is enabled for the connection.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::MissingPkceCookie`] when the cookie is absent or
    /// its value is not a well-formed verifier. An unusable verifier is
    /// treated the same as a missing one so the token endpoint never sees it.
    pub fn require_code_verifier(&self) -> Result<PkceVerifier, FlowError> {
        let raw = self.code_verifier().ok_or(FlowError::MissingPkceCookie)?;
        PkceVerifier::new(raw.to_string()).map_err(|_| FlowError::MissingPkceCookie)
    }
}
