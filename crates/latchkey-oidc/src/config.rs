//! Relying-party configuration.
//!
//! Three configuration surfaces:
//!
//! - [`ConnectionConfig`] — one named provider connection, as loaded from the
//!   host's configuration source;
//! - [`FlowSettings`] — handler-level options shared by every connection
//!   (callback URI, PKCE, userinfo retrieval, defaults);
//! - [`HttpSettings`] — outbound HTTP client tuning.
//!
//! Loading configuration files is the host's job; these types only define the
//! shape. Connections are turned into validated, immutable values by
//! [`ResolvedConnection::resolve`](crate::connection::ResolvedConnection::resolve).
//!
//! # Example (TOML)
//!
//! ```toml
//! [[connection]]
//! name = "corp-idp"
//! authorization_endpoint = "https://idp.example.com/authorize"
//! token_endpoint = "https://idp.example.com/token"
//! jwk_set_url = "https://idp.example.com/jwks.json"
//! issuer = "https://idp.example.com"
//! client_id = "my-client"
//! client_secret = "..."
//! scopes = ["openid", "profile"]
//!
//! [flow]
//! callback_uri = "https://app.example.com/callback"
//! pkce_enabled = true
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors surfaced while validating connections or settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required connection field is empty.
    #[error("connection '{name}': missing required field '{field}'")]
    MissingField { name: String, field: &'static str },

    /// A connection URL field does not parse.
    #[error("connection '{name}': invalid URL in '{field}': {source}")]
    InvalidUrl {
        name: String,
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    /// The configured ID token signing algorithm is not a known JWS algorithm.
    #[error("connection '{name}': unsupported ID token signing algorithm '{value}'")]
    UnsupportedAlgorithm { name: String, value: String },

    /// Two connections share the same name.
    #[error("duplicate connection name '{name}'")]
    DuplicateConnection { name: String },

    /// The flow settings have no callback URI.
    #[error("flow settings: callback URI is not set")]
    MissingCallbackUri,

    /// The callback URI does not parse as an absolute URL.
    #[error("flow settings: invalid callback URI: {source}")]
    InvalidCallbackUri {
        #[source]
        source: url::ParseError,
    },

    /// The outbound HTTP client could not be constructed.
    #[error("failed to build HTTP client: {reason}")]
    HttpClient { reason: String },
}

/// One named provider connection, as written in host configuration.
///
/// All endpoint fields are kept as strings here; URL parsing and algorithm
/// validation happen in [`ResolvedConnection::resolve`]. Multiple connections
/// to the same or different providers may coexist under distinct names.
///
/// [`ResolvedConnection::resolve`]: crate::connection::ResolvedConnection::resolve
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Unique connection name, referenced by the `state` parameter end-to-end.
    pub name: String,

    /// Provider authorization endpoint.
    pub authorization_endpoint: String,

    /// Provider token endpoint.
    pub token_endpoint: String,

    /// Provider userinfo endpoint. Required only when userinfo retrieval is
    /// enabled in [`FlowSettings`].
    pub user_info_endpoint: Option<String>,

    /// JWK set URL publishing the provider's signing keys.
    pub jwk_set_url: String,

    /// Expected `iss` claim value, compared byte-for-byte.
    pub issuer: String,

    /// OAuth2 client identifier issued by the provider.
    pub client_id: String,

    /// OAuth2 client secret. Optional for public (PKCE-only) clients.
    pub client_secret: Option<String>,

    /// Requested scopes, in order. Duplicates are dropped at resolve time.
    pub scopes: Vec<String>,

    /// Extra authorization request parameters as literal `key=value` strings.
    /// Entries not matching that shape are ignored.
    pub additional_authorization_parameters: Vec<String>,

    /// JWS algorithm the provider signs ID tokens with.
    pub id_token_signing_alg: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            authorization_endpoint: String::new(),
            token_endpoint: String::new(),
            user_info_endpoint: None,
            jwk_set_url: String::new(),
            issuer: String::new(),
            client_id: String::new(),
            client_secret: None,
            scopes: vec!["openid".to_string()],
            additional_authorization_parameters: Vec::new(),
            id_token_signing_alg: "RS256".to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Creates a connection config with the given name and endpoint set.
    pub fn new(
        name: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        jwk_set_url: impl Into<String>,
        issuer: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            jwk_set_url: jwk_set_url.into(),
            issuer: issuer.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the userinfo endpoint.
    #[must_use]
    pub fn with_user_info_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.user_info_endpoint = Some(endpoint.into());
        self
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Appends one `key=value` authorization request parameter.
    #[must_use]
    pub fn with_additional_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.additional_authorization_parameters
            .push(parameter.into());
        self
    }

    /// Sets the expected ID token signing algorithm.
    #[must_use]
    pub fn with_id_token_signing_alg(mut self, alg: impl Into<String>) -> Self {
        self.id_token_signing_alg = alg.into();
        self
    }
}

/// Handler-level flow options shared by every connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowSettings {
    /// Absolute redirect URI registered with the providers. The authorization
    /// request and the token exchange must carry the identical value.
    pub callback_uri: String,

    /// Enables PKCE (S256). When enabled the token exchange authenticates
    /// with `client_id` + `code_verifier` and no client secret is sent.
    pub pkce_enabled: bool,

    /// Enables the userinfo call after ID token validation.
    pub user_info_enabled: bool,

    /// Connection used when a flow is started without an explicit connection
    /// selection.
    pub default_connection: Option<String>,

    /// Redirect target used after login when the flow carried none.
    pub default_redirect: Option<String>,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            callback_uri: String::new(),
            pkce_enabled: false,
            user_info_enabled: true,
            default_connection: None,
            default_redirect: None,
        }
    }
}

impl FlowSettings {
    /// Creates flow settings for the given callback URI.
    pub fn new(callback_uri: impl Into<String>) -> Self {
        Self {
            callback_uri: callback_uri.into(),
            ..Self::default()
        }
    }

    /// Enables or disables PKCE.
    #[must_use]
    pub fn with_pkce(mut self, enabled: bool) -> Self {
        self.pkce_enabled = enabled;
        self
    }

    /// Enables or disables the userinfo call.
    #[must_use]
    pub fn with_user_info(mut self, enabled: bool) -> Self {
        self.user_info_enabled = enabled;
        self
    }

    /// Sets the default connection name.
    #[must_use]
    pub fn with_default_connection(mut self, name: impl Into<String>) -> Self {
        self.default_connection = Some(name.into());
        self
    }

    /// Sets the default post-login redirect target.
    #[must_use]
    pub fn with_default_redirect(mut self, redirect: impl Into<String>) -> Self {
        self.default_redirect = Some(redirect.into());
        self
    }

    /// Validates that the callback URI is present and absolute.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.callback_uri.is_empty() {
            return Err(ConfigError::MissingCallbackUri);
        }
        url::Url::parse(&self.callback_uri)
            .map_err(|source| ConfigError::InvalidCallbackUri { source })?;
        Ok(())
    }

    /// Picks the redirect target for a finished flow: the one carried by the
    /// flow when present, the configured default otherwise.
    ///
    /// Both values are request-influenced; hosts must validate the target
    /// (for example, require a local path) before emitting the redirect.
    pub fn effective_redirect<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
        requested.or(self.default_redirect.as_deref())
    }
}

/// Outbound HTTP client tuning for token, userinfo and JWKS requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Total per-request timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// TCP connect timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl HttpSettings {
    /// Sets the total per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the TCP connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builds a reqwest client honoring these settings.
    pub(crate) fn build_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient {
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.scopes, vec!["openid"]);
        assert_eq!(config.id_token_signing_alg, "RS256");
        assert!(config.client_secret.is_none());
    }

    #[test]
    fn connection_builders() {
        let config = ConnectionConfig::new(
            "corp",
            "https://idp.example.com/authorize",
            "https://idp.example.com/token",
            "https://idp.example.com/jwks.json",
            "https://idp.example.com",
            "client-1",
        )
        .with_client_secret("s3cr3t")
        .with_scopes(vec!["openid".into(), "email".into()])
        .with_additional_parameter("prompt=consent")
        .with_id_token_signing_alg("ES256");

        assert_eq!(config.name, "corp");
        assert_eq!(config.client_secret.as_deref(), Some("s3cr3t"));
        assert_eq!(config.scopes.len(), 2);
        assert_eq!(
            config.additional_authorization_parameters,
            vec!["prompt=consent"]
        );
        assert_eq!(config.id_token_signing_alg, "ES256");
    }

    #[test]
    fn flow_settings_validation() {
        assert!(matches!(
            FlowSettings::default().validate(),
            Err(ConfigError::MissingCallbackUri)
        ));
        assert!(matches!(
            FlowSettings::new("not a url").validate(),
            Err(ConfigError::InvalidCallbackUri { .. })
        ));
        assert!(
            FlowSettings::new("https://app.example.com/callback")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn flow_settings_effective_redirect() {
        let settings = FlowSettings::new("https://app.example.com/callback")
            .with_default_redirect("/home");
        assert_eq!(settings.effective_redirect(Some("/docs")), Some("/docs"));
        assert_eq!(settings.effective_redirect(None), Some("/home"));

        let bare = FlowSettings::new("https://app.example.com/callback");
        assert_eq!(bare.effective_redirect(None), None);
    }

    #[test]
    fn http_settings_deserialize_humantime() {
        let settings: HttpSettings =
            serde_json::from_value(serde_json::json!({ "request_timeout": "3s" }))
                .expect("valid settings");
        assert_eq!(settings.request_timeout, Duration::from_secs(3));
        // Unset fields keep their defaults.
        assert_eq!(settings.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn user_info_enabled_by_default() {
        assert!(FlowSettings::default().user_info_enabled);
        assert!(!FlowSettings::default().pkce_enabled);
    }
}
