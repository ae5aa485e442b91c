//! Userinfo endpoint client.
//!
//! After ID token validation the flow may enrich the verified identity with
//! provider-held profile claims. Standard claims come back typed as
//! [`UserInfoClaims`]; anything else stays reachable through its `extra` map.

use reqwest::header::ACCEPT;

use crate::connection::ResolvedConnection;
use crate::error::FlowError;
use crate::oidc::claims::UserInfoClaims;

/// Fetches userinfo claims with a bearer access token.
pub struct UserInfoClient {
    http_client: reqwest::Client,
}

impl UserInfoClient {
    /// Creates a client reusing an existing HTTP client.
    #[must_use]
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Fetches claims from the connection's userinfo endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::UserInfoError`] when the connection has no
    /// userinfo endpoint, the request fails, the endpoint answers with a
    /// non-success status or the body is not JSON.
    pub async fn fetch(
        &self,
        connection: &ResolvedConnection,
        access_token: &str,
    ) -> Result<UserInfoClaims, FlowError> {
        let endpoint = connection
            .user_info_endpoint
            .as_ref()
            .ok_or_else(|| FlowError::user_info("connection has no userinfo endpoint"))?;

        let response = self
            .http_client
            .get(endpoint.clone())
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FlowError::user_info(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                connection = %connection.name,
                status = status.as_u16(),
                "userinfo endpoint returned an error status"
            );
            return Err(FlowError::user_info(format!(
                "endpoint returned status {}",
                status.as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| FlowError::user_info(format!("unparseable response body: {e}")))
    }
}
