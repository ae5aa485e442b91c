//! # latchkey-oidc
//!
//! An embeddable OAuth 2.0 / OpenID Connect relying-party toolkit.
//!
//! This crate provides:
//! - Authorization Code flow with optional PKCE (S256)
//! - Cookie-bound CSRF protection across the authorization round trip
//! - ID token validation against provider JWKS (cached)
//! - Userinfo retrieval and a claims-processing seam for host principals
//! - Access/refresh-token lifecycle management behind a storage trait
//!
//! ## Overview
//!
//! The library is transport-agnostic: it never touches a socket on the
//! inbound side. Hosts translate their framework's requests into the value
//! types here ([`CallbackRequest`] in, [`AuthorizationRedirect`] and
//! [`VerifiedIdentity`] out) and own cookie emission, sessions and routing.
//! Outbound calls to the provider (token endpoint, JWKS, userinfo) are made
//! by the library over a shared `reqwest` client.
//!
//! Providers are configured as named connections. A typical host builds a
//! [`ConnectionRegistry`] from configuration at startup, wraps it in a
//! [`CallbackProcessor`] for login flows and a [`TokenLifecycleManager`] for
//! protected requests, and persists tokens behind its own [`TokenStore`].
//!
//! ## Modules
//!
//! - [`config`] - Connection, flow and HTTP client configuration
//! - [`connection`] - Resolved connections, lookup trait and registry
//! - [`error`] - The flow error taxonomy
//! - [`identity`] - Verified identities and the claims-processing seam
//! - [`lifecycle`] - Access-token lifecycle decisions for protected requests
//! - [`oauth`] - Authorization redirect, callback verification, token endpoint
//! - [`oidc`] - ID token validation, JWKS cache, userinfo
//! - [`storage`] - Token storage traits and the in-memory implementation
//! - [`types`] - Durable token types shared between flow and storage

pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod oauth;
pub mod oidc;
pub mod storage;
pub mod types;

pub use config::{ConfigError, ConnectionConfig, FlowSettings, HttpSettings};
pub use connection::{ConnectionLookup, ConnectionRegistry, ResolvedConnection};
pub use error::FlowError;
pub use identity::{
    AUTH_TYPE, AuthCredentials, ClaimsProcessor, DefaultClaimsProcessor, VerifiedIdentity,
};
pub use lifecycle::{LifecycleDecision, LifecycleError, TokenLifecycleManager};
pub use oauth::{
    AuthorizationRedirect, AuthorizationRequest, CallbackProcessor, CallbackRequest, FlowState,
    PkceChallenge, PkceVerifier, TokenEndpointClient, TokenResponse,
};
pub use oidc::{
    IdTokenClaims, IdTokenValidator, JwksCache, JwksCacheConfig, UserInfoClaims, UserInfoClient,
};
pub use storage::{
    InMemoryTokenStore, RefreshGuard, StoreError, StoredToken, TokenState, TokenStore,
};
pub use types::PersistedTokens;

/// Type alias for flow results.
pub type OidcResult<T> = Result<T, FlowError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use latchkey_oidc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::OidcResult;
    pub use crate::config::{ConnectionConfig, FlowSettings, HttpSettings};
    pub use crate::connection::{ConnectionLookup, ConnectionRegistry, ResolvedConnection};
    pub use crate::error::FlowError;
    pub use crate::identity::{AuthCredentials, ClaimsProcessor, VerifiedIdentity};
    pub use crate::lifecycle::{LifecycleDecision, TokenLifecycleManager};
    pub use crate::oauth::{AuthorizationRedirect, CallbackProcessor, CallbackRequest};
    pub use crate::storage::{InMemoryTokenStore, TokenStore};
    pub use crate::types::PersistedTokens;
}
