//! OpenID Connect layer: ID-token validation and userinfo retrieval.
//!
//! - [`claims`] - ID token and userinfo claim sets
//! - [`jwks`] - cached retrieval of provider signing keys
//! - [`userinfo`] - userinfo endpoint client
//! - [`validator`] - the ID token validation chain

pub mod claims;
pub mod jwks;
pub mod userinfo;
pub mod validator;

// Claim sets
pub use claims::{IdTokenClaims, UserInfoClaims};

// Signing key retrieval
pub use jwks::{JwksCache, JwksCacheConfig, JwksError};

// Userinfo client
pub use userinfo::UserInfoClient;

// ID token validation
pub use validator::{CLOCK_SKEW_LEEWAY_SECONDS, IdTokenValidator};
