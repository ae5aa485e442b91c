//! Authorization request construction.
//!
//! Beginning a flow produces two artifacts that must agree: the redirect URI
//! sent to the provider's authorization endpoint, and the cookies staged on
//! the user agent for the callback to verify. [`AuthorizationRequest::build`]
//! produces both from one [`FlowState`], so the `state` parameter and the
//! request-key cookie always carry the same key.
//!
//! With PKCE on, the verifier goes into a cookie and only its S256 challenge
//! appears in the URL.

use std::fmt;

use cookie::Cookie;
use url::Url;

use crate::config::FlowSettings;
use crate::connection::ResolvedConnection;
use crate::oauth::cookies::{create_code_verifier_cookie, create_request_key_cookie};
use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
use crate::oauth::state::FlowState;

/// A built authorization redirect: where to send the user agent and which
/// cookies to set alongside the redirect response.
pub struct AuthorizationRedirect {
    /// Fully assembled authorization endpoint URI.
    pub uri: Url,
    /// Cookies to set on the redirect response.
    pub cookies: Vec<Cookie<'static>>,
}

// Cookie values carry the request key and, with PKCE, the verifier; only the
// names show up in Debug output.
impl fmt::Debug for AuthorizationRedirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationRedirect")
            .field("uri", &self.uri.as_str())
            .field(
                "cookies",
                &self.cookies.iter().map(Cookie::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builds the authorization redirect for one connection.
pub struct AuthorizationRequest<'a> {
    connection: &'a ResolvedConnection,
    settings: &'a FlowSettings,
    redirect: Option<String>,
}

impl<'a> AuthorizationRequest<'a> {
    /// Creates a builder for the given connection and flow settings.
    #[must_use]
    pub fn new(connection: &'a ResolvedConnection, settings: &'a FlowSettings) -> Self {
        Self {
            connection,
            settings,
            redirect: None,
        }
    }

    /// Carries a post-login redirect target through the flow.
    #[must_use]
    pub fn with_redirect(mut self, redirect: impl Into<String>) -> Self {
        self.redirect = Some(redirect.into());
        self
    }

    /// Assembles the redirect URI and the cookies backing it.
    ///
    /// Query parameters already present on the authorization endpoint are
    /// preserved; flow parameters are appended after them.
    #[must_use]
    pub fn build(self) -> AuthorizationRedirect {
        let mut state = FlowState::new(&self.connection.name);
        if let Some(redirect) = self.redirect {
            state = state.with_redirect(redirect);
        }

        let mut cookies = vec![create_request_key_cookie(state.per_request_key.clone())];

        let challenge = if self.settings.pkce_enabled {
            let verifier = PkceVerifier::generate();
            let challenge = PkceChallenge::from_verifier(&verifier);
            cookies.push(create_code_verifier_cookie(verifier.into_inner()));
            Some(challenge)
        } else {
            None
        };

        let mut uri = self.connection.authorization_endpoint.clone();
        {
            let mut pairs = uri.query_pairs_mut();
            pairs
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.connection.client_id)
                .append_pair("redirect_uri", &self.settings.callback_uri)
                .append_pair("scope", &self.connection.scope_value())
                .append_pair("state", &state.encode());

            if let Some(challenge) = &challenge {
                pairs
                    .append_pair("code_challenge", challenge.as_str())
                    .append_pair("code_challenge_method", "S256");
            }

            for raw in &self.connection.additional_authorization_parameters {
                if let Some((key, value)) = parse_additional_parameter(raw) {
                    pairs.append_pair(key, value);
                }
            }
        }

        tracing::debug!(connection = %self.connection.name, "built authorization redirect");

        AuthorizationRedirect { uri, cookies }
    }
}

/// Accepts only literal `key=value` entries: splitting on `=` must yield
/// exactly two non-empty parts.
fn parse_additional_parameter(raw: &str) -> Option<(&str, &str)> {
    let mut parts = raw.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) if !key.is_empty() && !value.is_empty() => {
            Some((key, value))
        }
        _ => None,
    }
}
