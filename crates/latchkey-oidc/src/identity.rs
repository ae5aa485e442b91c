//! Verified identities and the claims-processing seam.
//!
//! A completed callback yields one [`VerifiedIdentity`]: the validated ID
//! token claims, the token set from the exchange, optional userinfo claims
//! and the host-mapped [`AuthCredentials`]. Ownership transfers to the host,
//! which establishes its own session from it.
//!
//! [`ClaimsProcessor`] is the injection point for mapping provider claims to
//! application principals. The shipped [`DefaultClaimsProcessor`] performs no
//! mapping; the OIDC subject on [`VerifiedIdentity`] is authoritative either
//! way.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::oauth::exchange::TokenResponse;
use crate::oidc::claims::{IdTokenClaims, UserInfoClaims};
use crate::types::PersistedTokens;

/// Credential provenance tag for host session layers.
pub const AUTH_TYPE: &str = "oidc";

/// Host-side credentials derived from a verified flow.
///
/// `subject` is the host's own principal mapping, when the processor resolves
/// one; it never overrides [`VerifiedIdentity::subject`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthCredentials {
    /// Application principal resolved by the claims processor, if any.
    pub subject: Option<String>,
    /// Arbitrary attributes the processor attaches for the session layer.
    pub attributes: HashMap<String, serde_json::Value>,
}

impl AuthCredentials {
    /// Sets the application principal.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Attaches one attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// Maps validated flow outputs to host credentials.
///
/// Called exactly once per successful flow, after ID token validation and
/// (when enabled) userinfo retrieval; implementations only ever see verified
/// inputs.
#[async_trait]
pub trait ClaimsProcessor: Send + Sync {
    /// Produces host credentials from the verified flow outputs.
    ///
    /// `user_info` is `None` when userinfo retrieval is disabled for the
    /// flow. `connection` is the connection name the flow ran against.
    async fn process(
        &self,
        user_info: Option<&UserInfoClaims>,
        tokens: &TokenResponse,
        connection: &str,
    ) -> AuthCredentials;
}

/// No-op claims processor: empty credentials, no principal mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClaimsProcessor;

#[async_trait]
impl ClaimsProcessor for DefaultClaimsProcessor {
    async fn process(
        &self,
        _user_info: Option<&UserInfoClaims>,
        _tokens: &TokenResponse,
        _connection: &str,
    ) -> AuthCredentials {
        AuthCredentials::default()
    }
}

/// The product of a successfully completed authorization flow.
#[derive(Clone)]
pub struct VerifiedIdentity {
    /// OIDC subject, taken from the validated ID token's `sub` claim.
    pub subject: String,
    /// Connection the flow ran against.
    pub connection: String,
    /// Validated ID token claims.
    pub claims: IdTokenClaims,
    /// Access token from the exchange.
    pub access_token: String,
    /// Refresh token, when the provider issued one.
    pub refresh_token: Option<String>,
    /// Access token expiry, when the provider stated a lifetime.
    pub expires_at: Option<OffsetDateTime>,
    /// Userinfo claims, when retrieval was enabled.
    pub user_info: Option<UserInfoClaims>,
    /// Host credentials produced by the claims processor.
    pub credentials: AuthCredentials,
    pub(crate) redirect_target: Option<String>,
}

impl VerifiedIdentity {
    /// Credential provenance tag, [`AUTH_TYPE`].
    #[must_use]
    pub fn auth_type(&self) -> &'static str {
        AUTH_TYPE
    }

    /// Where to send the user now that the flow is complete: the target the
    /// flow was started with, or the configured default.
    ///
    /// The value is request-influenced. Hosts must validate it (for example,
    /// require a local path) before emitting a redirect.
    #[must_use]
    pub fn redirect_target(&self) -> Option<&str> {
        self.redirect_target.as_deref()
    }

    /// The token material of this identity, in storable form.
    ///
    /// Persist this via [`TokenStore::persist`] to put the session under
    /// lifecycle management.
    ///
    /// [`TokenStore::persist`]: crate::storage::TokenStore::persist
    #[must_use]
    pub fn to_persisted_tokens(&self) -> PersistedTokens {
        PersistedTokens {
            access_token: self.access_token.clone(),
            expires_at: self.expires_at,
            refresh_token: self.refresh_token.clone(),
        }
    }
}

// Token material stays out of Debug output.
impl fmt::Debug for VerifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedIdentity")
            .field("subject", &self.subject)
            .field("connection", &self.connection)
            .field("access_token", &"..")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| ".."))
            .field("expires_at", &self.expires_at)
            .field("user_info", &self.user_info.is_some())
            .field("credentials", &self.credentials)
            .field("redirect_target", &self.redirect_target)
            .finish()
    }
}
