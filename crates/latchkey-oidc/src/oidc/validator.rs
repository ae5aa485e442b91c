//! ID token validation.
//!
//! Every ID token returned by a token endpoint passes through
//! [`IdTokenValidator::validate`] before any claim in it is trusted:
//!
//! 1. signature, against a key from the connection's `jwk_set_url`
//!    (kid-addressed and cached, with one refetch on miss or rotation);
//! 2. `iss` equals the connection's issuer exactly, with no normalization;
//! 3. `aud` contains the connection's `client_id`;
//! 4. `exp`/`iat` honored with a fixed clock skew allowance;
//! 5. when the flow bound a nonce, the token must echo it.
//!
//! The signing algorithm is pinned per connection. A token whose header
//! advertises anything else is rejected before any key is fetched.
//!
//! # Security Considerations
//!
//! Validation never returns a partially checked claim set: any failing check
//! yields [`FlowError::InvalidIdToken`] naming the check, and the caller gets
//! no claims at all. Reasons never include token material.

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Validation, decode, decode_header};
use time::OffsetDateTime;

use crate::connection::ResolvedConnection;
use crate::error::FlowError;
use crate::oidc::claims::IdTokenClaims;
use crate::oidc::jwks::JwksCache;

/// Clock skew tolerated on `exp` and `iat`, in seconds.
pub const CLOCK_SKEW_LEEWAY_SECONDS: u64 = 60;

/// Validates ID tokens against per-connection expectations.
pub struct IdTokenValidator {
    jwks: Arc<JwksCache>,
}

impl IdTokenValidator {
    /// Creates a validator backed by the given key cache.
    ///
    /// The cache is shared across connections; pass the same [`Arc`] to every
    /// component that resolves provider keys.
    #[must_use]
    pub fn new(jwks: Arc<JwksCache>) -> Self {
        Self { jwks }
    }

    /// Creates a validator with a default key cache.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(JwksCache::with_defaults()))
    }

    /// Validates the compact JWT `id_token` for `connection`.
    ///
    /// `expected_nonce` is the nonce bound to this flow, if any; flows that
    /// sent none pass `None` and the check is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InvalidIdToken`] naming the failing check.
    pub async fn validate(
        &self,
        id_token: &str,
        connection: &ResolvedConnection,
        expected_nonce: Option<&str>,
    ) -> Result<IdTokenClaims, FlowError> {
        let expected_alg = connection.id_token_signing_alg;

        let header = decode_header(id_token)
            .map_err(|_| FlowError::invalid_id_token("malformed token header"))?;

        // Reject before fetching keys: the connection pins one algorithm.
        if header.alg != expected_alg {
            return Err(FlowError::invalid_id_token(format!(
                "token algorithm {:?} does not match configured {:?}",
                header.alg, expected_alg
            )));
        }

        let mut validation = Validation::new(expected_alg);
        validation.set_audience(&[connection.client_id.as_str()]);
        validation.set_issuer(&[connection.issuer.as_str()]);
        validation.leeway = CLOCK_SKEW_LEEWAY_SECONDS;

        let token_data = match header.kid.as_deref() {
            Some(kid) => {
                let (key, key_alg) = self
                    .jwks
                    .get_key(&connection.jwk_set_url, kid)
                    .await
                    .map_err(|e| {
                        FlowError::invalid_id_token(format!("signing key retrieval failed: {e}"))
                    })?;

                if let Some(key_alg) = key_alg
                    && key_alg != expected_alg
                {
                    return Err(FlowError::invalid_id_token(
                        "signing key does not match the configured algorithm",
                    ));
                }

                decode::<IdTokenClaims>(id_token, &key, &validation)
                    .map_err(classify_jwt_error)?
            }
            None => {
                // No kid: try every signing key the provider publishes.
                let keys = self
                    .jwks
                    .find_signing_keys(&connection.jwk_set_url)
                    .await
                    .map_err(|e| {
                        FlowError::invalid_id_token(format!("signing key retrieval failed: {e}"))
                    })?;

                let mut last_error = None;
                let mut decoded = None;
                for (key, key_alg) in keys {
                    if let Some(key_alg) = key_alg
                        && key_alg != expected_alg
                    {
                        continue;
                    }
                    match decode::<IdTokenClaims>(id_token, &key, &validation) {
                        Ok(data) => {
                            decoded = Some(data);
                            break;
                        }
                        Err(e) => last_error = Some(e),
                    }
                }

                match (decoded, last_error) {
                    (Some(data), _) => data,
                    (None, Some(e)) => return Err(classify_jwt_error(e)),
                    (None, None) => {
                        return Err(FlowError::invalid_id_token(
                            "no usable signing key in provider key set",
                        ));
                    }
                }
            }
        };

        let claims = token_data.claims;

        // jsonwebtoken checks exp but not iat; a token from the future is
        // rejected here with the same skew allowance.
        let now = OffsetDateTime::now_utc().unix_timestamp();
        if claims.iat > now + CLOCK_SKEW_LEEWAY_SECONDS as i64 {
            return Err(FlowError::invalid_id_token("token issued in the future"));
        }

        if let Some(expected) = expected_nonce {
            match claims.nonce.as_deref() {
                Some(nonce) if nonce == expected => {}
                _ => return Err(FlowError::invalid_id_token("nonce mismatch")),
            }
        }

        tracing::debug!(subject = %claims.sub, issuer = %claims.iss, "validated ID token");

        Ok(claims)
    }
}

/// Maps a jsonwebtoken failure to an [`FlowError::InvalidIdToken`] naming the
/// failing check.
fn classify_jwt_error(e: jsonwebtoken::errors::Error) -> FlowError {
    let reason = match e.kind() {
        ErrorKind::ExpiredSignature => "token has expired".to_string(),
        ErrorKind::ImmatureSignature => "token is not yet valid".to_string(),
        ErrorKind::InvalidIssuer => "issuer mismatch".to_string(),
        ErrorKind::InvalidAudience => "audience mismatch".to_string(),
        ErrorKind::InvalidSignature => "signature verification failed".to_string(),
        ErrorKind::InvalidAlgorithm => "unexpected signing algorithm".to_string(),
        ErrorKind::MissingRequiredClaim(claim) => format!("missing required claim: {claim}"),
        _ => format!("token validation failed: {e}"),
    };
    FlowError::invalid_id_token(reason)
}
