//! ID token and userinfo claim sets.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Claims carried by a validated ID token.
///
/// Only the claims the flow itself depends on are typed; everything else the
/// provider includes (profile claims, custom claims) is kept in [`extra`] and
/// reachable through [`IdTokenClaims::claim`].
///
/// [`extra`]: IdTokenClaims::extra
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer identifier.
    pub iss: String,

    /// Subject identifier, stable per issuer.
    pub sub: String,

    /// Audience; providers send either a single string or an array.
    #[serde(deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at time (Unix timestamp).
    pub iat: i64,

    /// Nonce echoed back from the authorization request, when one was sent.
    pub nonce: Option<String>,

    /// Every other claim the provider included.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl IdTokenClaims {
    /// Returns `true` if the audience list contains `client_id`.
    #[must_use]
    pub fn audience_contains(&self, client_id: &str) -> bool {
        self.aud.iter().any(|aud| aud == client_id)
    }

    /// Look up a non-standard claim by name.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }
}

/// Claims returned by a userinfo endpoint.
///
/// Every field is optional: providers vary widely in what they return, and
/// the flow itself requires none of them. Standard profile claims are typed,
/// the rest lands in [`extra`].
///
/// [`extra`]: UserInfoClaims::extra
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfoClaims {
    /// Subject identifier; providers echo the ID token subject.
    pub sub: Option<String>,

    /// Preferred e-mail address.
    pub email: Option<String>,

    /// Whether the provider has verified the e-mail address.
    pub email_verified: Option<bool>,

    /// End user's display name.
    pub name: Option<String>,

    /// Shorthand name the end user prefers.
    pub preferred_username: Option<String>,

    /// Every other claim the provider included.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl UserInfoClaims {
    /// Look up a non-standard claim by name.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }
}

/// Custom deserializer for audience which can be a string or array.
fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}
