//! Token endpoint client.
//!
//! Covers both grants the flow uses: `authorization_code` (with the PKCE
//! verifier when PKCE is on) and `refresh_token`. Client authentication
//! follows the flow's PKCE posture:
//!
//! - PKCE on: public-client authentication, `client_id` in the form body and
//!   no client secret on the wire;
//! - PKCE off: HTTP Basic with `client_id` and `client_secret`. A connection
//!   without a secret fails before any request is sent.
//!
//! Provider error bodies (`error`, `error_description`) surface verbatim in
//! [`FlowError::TokenExchange`]; transport failures map to
//! [`FlowError::TokenExchangeIo`] and are never retried.

use std::fmt;

use reqwest::header::ACCEPT;
use serde::Deserialize;

use crate::config::FlowSettings;
use crate::connection::ResolvedConnection;
use crate::error::FlowError;
use crate::oauth::pkce::PkceVerifier;

/// Successful token endpoint response.
///
/// `id_token` is optional at this layer; the callback decides whether its
/// absence is acceptable for the flow.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// The issued access token.
    pub access_token: String,
    /// Token type, `Bearer` for every supported provider.
    pub token_type: String,
    /// Access token lifetime in seconds, when the provider states one.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token, when the provider issues one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OIDC ID token, when the provider issues one.
    #[serde(default)]
    pub id_token: Option<String>,
    /// Granted scope, when the provider reports it.
    #[serde(default)]
    pub scope: Option<String>,
}

// Token material stays out of Debug output.
impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"..")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| ".."))
            .field("id_token", &self.id_token.as_ref().map(|_| ".."))
            .field("scope", &self.scope)
            .finish()
    }
}

/// Token endpoint error body, RFC 6749 section 5.2.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Posts grants to provider token endpoints.
pub struct TokenEndpointClient {
    http_client: reqwest::Client,
    callback_uri: String,
    pkce_enabled: bool,
}

impl TokenEndpointClient {
    /// Creates a client reusing an existing HTTP client.
    #[must_use]
    pub fn new(http_client: reqwest::Client, settings: &FlowSettings) -> Self {
        Self {
            http_client,
            callback_uri: settings.callback_uri.clone(),
            pkce_enabled: settings.pkce_enabled,
        }
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// `redirect_uri` is always the configured callback URI; providers reject
    /// the grant when it differs from the authorization request.
    ///
    /// # Errors
    ///
    /// [`FlowError::TokenExchange`] for protocol-level rejections and
    /// [`FlowError::TokenExchangeIo`] for transport failures.
    pub async fn exchange_code(
        &self,
        connection: &ResolvedConnection,
        code: &str,
        verifier: Option<&PkceVerifier>,
    ) -> Result<TokenResponse, FlowError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.callback_uri.as_str()),
        ];
        if let Some(verifier) = verifier {
            params.push(("code_verifier", verifier.as_str()));
        }

        tracing::debug!(connection = %connection.name, "exchanging authorization code");
        self.post_token_request(connection, params).await
    }

    /// Redeems a refresh token for a fresh token set.
    ///
    /// The requested scope is left unchanged; providers re-issue the
    /// originally granted scope.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`Self::exchange_code`].
    pub async fn refresh(
        &self,
        connection: &ResolvedConnection,
        refresh_token: &str,
    ) -> Result<TokenResponse, FlowError> {
        let params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        tracing::debug!(connection = %connection.name, "refreshing access token");
        self.post_token_request(connection, params).await
    }

    async fn post_token_request(
        &self,
        connection: &ResolvedConnection,
        mut params: Vec<(&str, &str)>,
    ) -> Result<TokenResponse, FlowError> {
        let request = if self.pkce_enabled {
            params.push(("client_id", connection.client_id.as_str()));
            self.http_client
                .post(connection.token_endpoint.clone())
                .form(&params)
        } else {
            let secret = connection.client_secret.as_deref().ok_or_else(|| {
                FlowError::token_exchange(
                    "client_not_configured",
                    Some(format!(
                        "connection '{}' has no client secret",
                        connection.name
                    )),
                )
            })?;
            self.http_client
                .post(connection.token_endpoint.clone())
                .basic_auth(&connection.client_id, Some(secret))
                .form(&params)
        };

        let response = request
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FlowError::token_exchange_io(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                connection = %connection.name,
                status = status.as_u16(),
                "token endpoint rejected the request"
            );
            return Err(match response.json::<TokenErrorResponse>().await {
                Ok(body) => FlowError::token_exchange(body.error, body.error_description),
                Err(_) => {
                    FlowError::token_exchange(format!("http_{}", status.as_u16()), None::<String>)
                }
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| FlowError::token_exchange("invalid_response", Some(e.to_string())))
    }
}
