//! Error types for the authorization code flow.
//!
//! [`FlowError`] is the single rejection taxonomy for the whole flow: entry
//! point, callback processing, token exchange, ID token validation and
//! userinfo retrieval. Modules with self-contained failure modes (state
//! codec, PKCE, JWKS, configuration, token store) define their own error
//! enums and are mapped into this taxonomy at the flow boundary.
//!
//! # Security Considerations
//!
//! `Display` output is safe to log and to show in generic failure pages:
//! variants never embed client secrets, code verifiers, authorization codes
//! or token material. Provider-supplied error codes and descriptions are
//! carried verbatim because providers already expose them to the user agent
//! on the redirect.

use thiserror::Error;

/// Rejection reasons for an authorization flow attempt.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The inbound request could not be parsed as an authorization response.
    ///
    /// Recoverable: another authentication mechanism may still handle the
    /// request.
    #[error("cannot extract an authorization response from the request: {reason}")]
    ParseError { reason: String },

    /// The authorization response carried no decodable `state` parameter.
    ///
    /// Recoverable, same policy as [`FlowError::ParseError`].
    #[error("no usable state parameter in the authorization response")]
    MissingState,

    /// The authorization response carried neither a code nor an error.
    #[error("no authorization code in the authorization response")]
    MissingCode,

    /// The request-key cookie staged by the authorization request is absent.
    #[error("state check failed: no request key cookie present")]
    MissingCookie,

    /// PKCE is enabled but the code-verifier cookie is absent or unusable.
    #[error("no usable code verifier cookie present")]
    MissingPkceCookie,

    /// The `state` request key and the request-key cookie do not match.
    #[error("state check failed: request keys from client and server differ")]
    CsrfMismatch,

    /// The provider answered the authorization request with an error.
    #[error("authorization denied by the provider: {error}")]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    /// The decoded state references no usable connection name.
    #[error("authorization state does not reference a connection")]
    InvalidConnection,

    /// The token exchange failed below the protocol layer (network, TLS,
    /// timeout). Fatal for this attempt; never retried.
    #[error("token exchange failed: {reason}")]
    TokenExchangeIo { reason: String },

    /// The token endpoint rejected the exchange or returned an unusable
    /// response.
    #[error("token endpoint rejected the request: {error}")]
    TokenExchange {
        error: String,
        description: Option<String>,
    },

    /// The ID token failed validation; `reason` names the failing check.
    #[error("ID token validation failed: {reason}")]
    InvalidIdToken { reason: String },

    /// The userinfo request failed or returned a non-success response.
    #[error("userinfo request failed: {reason}")]
    UserInfoError { reason: String },

    /// No connection with the requested name is registered.
    #[error("unknown connection '{name}'")]
    UnknownConnection { name: String },
}

impl FlowError {
    /// Creates a [`FlowError::ParseError`].
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::ParseError {
            reason: reason.into(),
        }
    }

    /// Creates a [`FlowError::AuthorizationDenied`] from provider details.
    pub fn authorization_denied(
        error: impl Into<String>,
        description: Option<impl Into<String>>,
    ) -> Self {
        Self::AuthorizationDenied {
            error: error.into(),
            description: description.map(Into::into),
        }
    }

    /// Creates a [`FlowError::TokenExchangeIo`].
    pub fn token_exchange_io(reason: impl Into<String>) -> Self {
        Self::TokenExchangeIo {
            reason: reason.into(),
        }
    }

    /// Creates a [`FlowError::TokenExchange`] from provider details.
    pub fn token_exchange(
        error: impl Into<String>,
        description: Option<impl Into<String>>,
    ) -> Self {
        Self::TokenExchange {
            error: error.into(),
            description: description.map(Into::into),
        }
    }

    /// Creates a [`FlowError::InvalidIdToken`] naming the failing check.
    pub fn invalid_id_token(reason: impl Into<String>) -> Self {
        Self::InvalidIdToken {
            reason: reason.into(),
        }
    }

    /// Creates a [`FlowError::UserInfoError`].
    pub fn user_info(reason: impl Into<String>) -> Self {
        Self::UserInfoError {
            reason: reason.into(),
        }
    }

    /// Creates a [`FlowError::UnknownConnection`].
    pub fn unknown_connection(name: impl Into<String>) -> Self {
        Self::UnknownConnection { name: name.into() }
    }

    /// Whether another authentication mechanism may still try the request.
    ///
    /// True for structural problems only: the request did not look like an
    /// authorization response addressed to this handler.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ParseError { .. } | Self::MissingState)
    }

    /// Whether the rejection is a security-policy violation that must not
    /// fall back to other handlers.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::CsrfMismatch | Self::MissingPkceCookie)
    }

    /// Suggested HTTP status for hosts surfacing the rejection.
    ///
    /// `None` for recoverable rejections, which hosts usually pass on to the
    /// next authentication mechanism instead of answering directly.
    pub fn status_hint(&self) -> Option<u16> {
        match self {
            Self::ParseError { .. } | Self::MissingState => None,
            Self::MissingCode
            | Self::MissingCookie
            | Self::MissingPkceCookie
            | Self::InvalidConnection
            | Self::UnknownConnection { .. } => Some(400),
            Self::CsrfMismatch | Self::AuthorizationDenied { .. } => Some(403),
            Self::InvalidIdToken { .. } => Some(401),
            Self::TokenExchangeIo { .. }
            | Self::TokenExchange { .. }
            | Self::UserInfoError { .. } => Some(502),
        }
    }

    /// Provider-supplied error description, when the variant carries one.
    pub fn provider_description(&self) -> Option<&str> {
        match self {
            Self::AuthorizationDenied { description, .. }
            | Self::TokenExchange { description, .. } => description.as_deref(),
            _ => None,
        }
    }
}
