//! Provider key fetching and caching.
//!
//! ID token signatures are verified against the provider's published JSON Web
//! Key Set. [`JwksCache`] fetches key sets from each connection's
//! `jwk_set_url`, keeps them in memory, and answers kid lookups during
//! validation. A lookup that misses the cache (first use, or a provider that
//! rotated its keys) triggers exactly one refetch before failing.
//!
//! # Cache-Control Support
//!
//! The cache honors `Cache-Control: max-age=X` from the provider, clamped
//! between configurable minimum and maximum bounds so a misbehaving provider
//! can neither hammer the endpoint nor pin a stale key set for days.
//!
//! # Security Considerations
//!
//! - Only HTTPS URIs are allowed for key set endpoints (configurable for
//!   testing against local mock servers)
//! - Responses are size-limited and requests carry timeouts
//! - TTL bounds cap the effect of a malicious Cache-Control header

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use url::Url;

/// Configuration for the provider key cache.
#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    /// Default TTL when Cache-Control header is absent (default: 1 hour).
    pub default_ttl: Duration,

    /// Maximum TTL regardless of Cache-Control (default: 24 hours).
    pub max_ttl: Duration,

    /// Minimum TTL regardless of Cache-Control (default: 5 minutes).
    pub min_ttl: Duration,

    /// HTTP request timeout (default: 10 seconds).
    pub request_timeout: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Whether to allow HTTP (non-HTTPS) key set URIs.
    /// This should only be enabled for testing.
    pub allow_http: bool,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),   // 1 hour
            max_ttl: Duration::from_secs(86400),      // 24 hours
            min_ttl: Duration::from_secs(300),        // 5 minutes
            request_timeout: Duration::from_secs(10), // 10 seconds
            max_response_size: 1024 * 1024,           // 1 MB
            allow_http: false,
        }
    }
}

impl JwksCacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default TTL (used when Cache-Control is absent).
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the maximum TTL.
    #[must_use]
    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    /// Sets the minimum TTL.
    #[must_use]
    pub fn with_min_ttl(mut self, ttl: Duration) -> Self {
        self.min_ttl = ttl;
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the maximum response size.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Allows HTTP (non-HTTPS) key set URIs.
    ///
    /// # Warning
    ///
    /// This should only be used for testing. Production key set endpoints
    /// must use HTTPS.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Errors that can occur during key set operations.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// A network error occurred while fetching the key set.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The HTTP request returned a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The key set response could not be parsed as JSON.
    #[error("Failed to parse key set: {0}")]
    ParseError(String),

    /// The requested key was not found, even after a refetch.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// No signing keys were found in the key set.
    #[error("No signing keys found in key set")]
    NoSigningKeys,

    /// The key set URI scheme is not allowed (must be HTTPS in production).
    #[error("Invalid URL scheme: only HTTPS is allowed")]
    InvalidScheme,

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

/// Cached key set entry with its expiry.
struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

/// In-memory cache of provider key sets, keyed by endpoint URI.
///
/// Shared across connections and clones cheaply via [`Arc`] inside; the
/// validator holds one instance for all configured connections.
pub struct JwksCache {
    /// HTTP client for fetching key sets.
    http_client: reqwest::Client,
    /// Cached key sets by URI.
    cache: Arc<RwLock<HashMap<String, CachedJwks>>>,
    /// Configuration.
    config: JwksCacheConfig,
}

impl JwksCache {
    /// Creates a new key cache with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(config: JwksCacheConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Creates a new key cache with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(JwksCacheConfig::default())
    }

    /// Gets a decoding key by key ID from a key set endpoint.
    ///
    /// Checks the cache first. A miss (cold cache, expired entry, or a kid
    /// the cached set does not contain, as happens after provider key
    /// rotation) triggers one fetch before the lookup fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the key set cannot be fetched or the kid is not
    /// present even in a freshly fetched set.
    pub async fn get_key(
        &self,
        jwks_uri: &Url,
        kid: &str,
    ) -> Result<(DecodingKey, Option<Algorithm>), JwksError> {
        if let Some(result) = self.get_cached_key(jwks_uri, kid).await {
            tracing::trace!(kid = %kid, uri = %jwks_uri, "key cache hit");
            return Ok(result);
        }

        tracing::debug!(kid = %kid, uri = %jwks_uri, "key cache miss, fetching key set");
        self.refresh(jwks_uri).await?;

        self.get_cached_key(jwks_uri, kid)
            .await
            .ok_or_else(|| JwksError::KeyNotFound(kid.to_string()))
    }

    /// Gets a decoding key from cache without fetching.
    async fn get_cached_key(
        &self,
        jwks_uri: &Url,
        kid: &str,
    ) -> Option<(DecodingKey, Option<Algorithm>)> {
        let cache = self.cache.read().await;
        let key = normalize_uri(jwks_uri);

        cache.get(&key).and_then(|cached| {
            if Instant::now() >= cached.expires_at {
                return None;
            }

            cached
                .jwks
                .keys
                .iter()
                .find(|k| k.common.key_id.as_deref() == Some(kid))
                .and_then(|jwk| {
                    DecodingKey::from_jwk(jwk)
                        .ok()
                        .map(|dk| (dk, jwk_algorithm(jwk)))
                })
        })
    }

    /// Gets all signing keys from a key set endpoint.
    ///
    /// Used when a token carries no `kid` header and every candidate key must
    /// be tried. Keys marked `use: "enc"` are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if the key set cannot be fetched or contains no
    /// signing keys.
    pub async fn find_signing_keys(
        &self,
        jwks_uri: &Url,
    ) -> Result<Vec<(DecodingKey, Option<Algorithm>)>, JwksError> {
        self.ensure_cached(jwks_uri).await?;

        let cache = self.cache.read().await;
        let key = normalize_uri(jwks_uri);

        let cached = cache
            .get(&key)
            .ok_or_else(|| JwksError::NetworkError("Cache miss after refresh".to_string()))?;

        let keys: Vec<_> = cached
            .jwks
            .keys
            .iter()
            .filter(|k| !matches!(&k.common.public_key_use, Some(PublicKeyUse::Encryption)))
            .filter_map(|jwk| {
                DecodingKey::from_jwk(jwk)
                    .ok()
                    .map(|dk| (dk, jwk_algorithm(jwk)))
            })
            .collect();

        if keys.is_empty() {
            Err(JwksError::NoSigningKeys)
        } else {
            Ok(keys)
        }
    }

    /// Ensures the cache has a fresh entry for the given URI.
    async fn ensure_cached(&self, jwks_uri: &Url) -> Result<(), JwksError> {
        let key = normalize_uri(jwks_uri);

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key)
                && Instant::now() < cached.expires_at
            {
                return Ok(());
            }
        }

        self.refresh(jwks_uri).await
    }

    /// Fetches the key set from the endpoint and updates the cache.
    ///
    /// Always fetches, regardless of cache state.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI scheme is not allowed, the HTTP request
    /// fails, or the response cannot be parsed as a key set.
    pub async fn refresh(&self, jwks_uri: &Url) -> Result<(), JwksError> {
        self.validate_scheme(jwks_uri)?;

        let response = self
            .http_client
            .get(jwks_uri.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(uri = %jwks_uri, error = %e, "failed to fetch key set");
                JwksError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(JwksError::HttpError(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_response_size
        {
            return Err(JwksError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let ttl = self.parse_cache_control(response.headers());

        let jwks: JwkSet = response.json().await.map_err(|e| {
            tracing::warn!(uri = %jwks_uri, error = %e, "failed to parse key set");
            JwksError::ParseError(e.to_string())
        })?;

        tracing::debug!(
            uri = %jwks_uri,
            keys = jwks.keys.len(),
            ttl_secs = ttl.as_secs(),
            "cached provider key set"
        );

        let now = Instant::now();
        let key = normalize_uri(jwks_uri);

        let mut cache = self.cache.write().await;
        cache.insert(
            key,
            CachedJwks {
                jwks,
                expires_at: now + ttl,
            },
        );

        Ok(())
    }

    /// Validates that the URI uses an allowed scheme.
    fn validate_scheme(&self, uri: &Url) -> Result<(), JwksError> {
        let scheme = uri.scheme();

        if scheme == "https" {
            return Ok(());
        }

        if scheme == "http" && self.config.allow_http {
            return Ok(());
        }

        Err(JwksError::InvalidScheme)
    }

    /// Parses Cache-Control header to determine TTL.
    ///
    /// Extracts the `max-age` directive and clamps it between `min_ttl` and
    /// `max_ttl`. Returns `default_ttl` when no usable directive is present.
    fn parse_cache_control(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let ttl = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split(',').find_map(|directive| {
                    let directive = directive.trim();
                    if let Some(stripped) = directive.strip_prefix("max-age=") {
                        stripped.parse::<u64>().ok()
                    } else {
                        None
                    }
                })
            })
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl);

        ttl.min(self.config.max_ttl).max(self.config.min_ttl)
    }

    /// Invalidates a cached key set entry.
    ///
    /// Forces the next lookup against this URI to fetch a fresh key set.
    pub async fn invalidate(&self, jwks_uri: &Url) {
        let key = normalize_uri(jwks_uri);
        let mut cache = self.cache.write().await;
        cache.remove(&key);
        tracing::debug!(uri = %jwks_uri, "invalidated cached key set");
    }

    /// Returns the number of cached key sets.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Returns `true` if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

/// Normalizes a URI for use as a cache key.
fn normalize_uri(uri: &Url) -> String {
    uri.as_str().trim_end_matches('/').to_string()
}

/// Extracts the signing algorithm advertised by a JWK.
fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        jsonwebtoken::jwk::KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        jsonwebtoken::jwk::KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        jsonwebtoken::jwk::KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        jsonwebtoken::jwk::KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        jsonwebtoken::jwk::KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        jsonwebtoken::jwk::KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        jsonwebtoken::jwk::KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        jsonwebtoken::jwk::KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        jsonwebtoken::jwk::KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        jsonwebtoken::jwk::KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        jsonwebtoken::jwk::KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        jsonwebtoken::jwk::KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}
