//! Provider connections and the read-only connection registry.
//!
//! A [`ConnectionConfig`] from host configuration becomes an immutable
//! [`ResolvedConnection`] through [`ResolvedConnection::resolve`]: URLs are
//! parsed, the signing algorithm is validated and scopes are deduplicated.
//! Every variant of provider shares this single value type.
//!
//! Flows look connections up by name through the [`ConnectionLookup`] trait.
//! [`ConnectionRegistry`] is the shipped implementation: a plain map built
//! once at startup, shared read-only across requests, never mutated from
//! request-handling paths. Hosts with dynamic connection sources implement
//! [`ConnectionLookup`] themselves.

use std::collections::HashMap;
use std::str::FromStr;

use jsonwebtoken::Algorithm;
use url::Url;

use crate::config::{ConfigError, ConnectionConfig};
use crate::error::FlowError;

/// An immutable, validated provider connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConnection {
    /// Unique connection name.
    pub name: String,
    /// Provider authorization endpoint.
    pub authorization_endpoint: Url,
    /// Provider token endpoint.
    pub token_endpoint: Url,
    /// Provider userinfo endpoint, when configured.
    pub user_info_endpoint: Option<Url>,
    /// JWK set URL publishing the provider's signing keys.
    pub jwk_set_url: Url,
    /// Expected `iss` claim value. Kept as a string: the comparison is exact,
    /// with no URL normalization.
    pub issuer: String,
    /// OAuth2 client identifier.
    pub client_id: String,
    /// OAuth2 client secret, absent for public clients.
    pub client_secret: Option<String>,
    /// Requested scopes, in order, deduplicated.
    pub scopes: Vec<String>,
    /// Extra authorization request parameters as literal `key=value` strings.
    pub additional_authorization_parameters: Vec<String>,
    /// JWS algorithm ID tokens must be signed with.
    pub id_token_signing_alg: Algorithm,
}

impl ResolvedConnection {
    /// Validates a raw connection config into an immutable connection value.
    pub fn resolve(config: &ConnectionConfig) -> Result<Self, ConfigError> {
        let name = required(config, "name", &config.name)?;
        let issuer = required(config, "issuer", &config.issuer)?;
        let client_id = required(config, "client_id", &config.client_id)?;

        let authorization_endpoint = parse_url(
            config,
            "authorization_endpoint",
            &config.authorization_endpoint,
        )?;
        let token_endpoint = parse_url(config, "token_endpoint", &config.token_endpoint)?;
        let jwk_set_url = parse_url(config, "jwk_set_url", &config.jwk_set_url)?;
        let user_info_endpoint = match config.user_info_endpoint.as_deref() {
            Some(endpoint) => Some(parse_url(config, "user_info_endpoint", endpoint)?),
            None => None,
        };

        let id_token_signing_alg = Algorithm::from_str(&config.id_token_signing_alg)
            .map_err(|_| ConfigError::UnsupportedAlgorithm {
                name: config.name.clone(),
                value: config.id_token_signing_alg.clone(),
            })?;

        let mut scopes = Vec::with_capacity(config.scopes.len());
        for scope in &config.scopes {
            if !scope.is_empty() && !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }

        Ok(Self {
            name,
            authorization_endpoint,
            token_endpoint,
            user_info_endpoint,
            jwk_set_url,
            issuer,
            client_id,
            client_secret: config.client_secret.clone(),
            scopes,
            additional_authorization_parameters: config
                .additional_authorization_parameters
                .clone(),
            id_token_signing_alg,
        })
    }

    /// Whether the connection holds a client secret.
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }

    /// The `scope` request parameter value: scopes joined with spaces.
    pub fn scope_value(&self) -> String {
        self.scopes.join(" ")
    }
}

fn required(config: &ConnectionConfig, field: &'static str, value: &str) -> Result<String, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::MissingField {
            name: config.name.clone(),
            field,
        });
    }
    Ok(value.to_string())
}

fn parse_url(config: &ConnectionConfig, field: &'static str, value: &str) -> Result<Url, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::MissingField {
            name: config.name.clone(),
            field,
        });
    }
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        name: config.name.clone(),
        field,
        source,
    })
}

/// Read-only lookup of connections by name.
///
/// Implementations must be safe for concurrent use; the built-in
/// [`ConnectionRegistry`] achieves that by being immutable after
/// construction.
pub trait ConnectionLookup: Send + Sync {
    /// Returns the connection registered under `name`.
    ///
    /// # Errors
    ///
    /// [`FlowError::UnknownConnection`] when no such connection exists.
    fn connection(&self, name: &str) -> Result<ResolvedConnection, FlowError>;
}

/// Immutable map of named connections, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, ResolvedConnection>,
}

impl ConnectionRegistry {
    /// Resolves every config and builds the registry.
    ///
    /// # Errors
    ///
    /// Returns the first resolution failure, or
    /// [`ConfigError::DuplicateConnection`] when two configs share a name.
    pub fn from_configs(configs: &[ConnectionConfig]) -> Result<Self, ConfigError> {
        let mut connections = HashMap::with_capacity(configs.len());
        for config in configs {
            let resolved = ResolvedConnection::resolve(config)?;
            if connections
                .insert(resolved.name.clone(), resolved)
                .is_some()
            {
                return Err(ConfigError::DuplicateConnection {
                    name: config.name.clone(),
                });
            }
        }
        Ok(Self { connections })
    }

    /// Builds a registry from already-resolved connections.
    pub fn from_connections(connections: Vec<ResolvedConnection>) -> Result<Self, ConfigError> {
        let mut map = HashMap::with_capacity(connections.len());
        for connection in connections {
            let name = connection.name.clone();
            if map.insert(name.clone(), connection).is_some() {
                return Err(ConfigError::DuplicateConnection { name });
            }
        }
        Ok(Self { connections: map })
    }

    /// Registered connection names, unordered.
    pub fn names(&self) -> Vec<&str> {
        self.connections.keys().map(String::as_str).collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl ConnectionLookup for ConnectionRegistry {
    fn connection(&self, name: &str) -> Result<ResolvedConnection, FlowError> {
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::unknown_connection(name))
    }
}
