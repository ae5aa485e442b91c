//! Callback processing.
//!
//! [`CallbackProcessor`] owns the protocol state machine for one
//! authorization round trip: verify the returning request against the staged
//! cookies, exchange the code, validate the ID token, optionally fetch
//! userinfo, and hand the host a [`VerifiedIdentity`].
//!
//! The checks run in a fixed order and the token exchange never starts before
//! the CSRF comparison has passed. Rejections surface as [`FlowError`]
//! variants; the two structural ones ([`FlowError::ParseError`],
//! [`FlowError::MissingState`]) are recoverable in the sense that the request
//! may simply belong to another handler.
//!
//! # Security Considerations
//!
//! A provider error response (`error=...`) is only honored after the
//! request-key comparison passes: a forged "denied" callback is still a
//! forged callback.

use std::fmt;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use url::Url;

use crate::config::{ConfigError, FlowSettings, HttpSettings};
use crate::connection::{ConnectionLookup, ResolvedConnection};
use crate::error::FlowError;
use crate::identity::{ClaimsProcessor, DefaultClaimsProcessor, VerifiedIdentity};
use crate::oauth::authorize::{AuthorizationRedirect, AuthorizationRequest};
use crate::oauth::cookies::FlowCookies;
use crate::oauth::exchange::TokenEndpointClient;
use crate::oauth::state::FlowState;
use crate::oidc::jwks::JwksCache;
use crate::oidc::userinfo::UserInfoClient;
use crate::oidc::validator::IdTokenValidator;

/// One inbound callback request, framework-neutral.
///
/// Hosts construct this from whatever request type their transport uses:
/// the full request URI, the parsed query parameters in order of appearance,
/// and the raw `Cookie` header when one was sent.
#[derive(Clone)]
pub struct CallbackRequest {
    /// Absolute request URI as received.
    pub uri: String,
    /// Query parameters in order of appearance.
    pub params: Vec<(String, String)>,
    /// Raw `Cookie` request header.
    pub cookies: Option<String>,
}

impl CallbackRequest {
    /// Creates a request from pre-parsed parts.
    #[must_use]
    pub fn new(
        uri: impl Into<String>,
        params: Vec<(String, String)>,
        cookies: Option<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            params,
            cookies,
        }
    }

    /// Creates a request from an absolute URI, parsing its query string.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::ParseError`] when the URI does not parse.
    pub fn parse(uri: impl Into<String>, cookies: Option<&str>) -> Result<Self, FlowError> {
        let uri = uri.into();
        let parsed =
            Url::parse(&uri).map_err(|_| FlowError::parse("request URI does not parse"))?;
        let params = parsed.query_pairs().into_owned().collect();
        Ok(Self {
            uri,
            params,
            cookies: cookies.map(String::from),
        })
    }

    /// First occurrence of the query parameter `name`.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

// Cookie values and the authorization code stay out of Debug output.
impl fmt::Debug for CallbackRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRequest")
            .field("uri", &self.uri.split('?').next().unwrap_or(&self.uri))
            .field("params", &self.params.len())
            .field("cookies", &self.cookies.is_some())
            .finish()
    }
}

/// Drives authorization flows for a set of connections.
pub struct CallbackProcessor {
    connections: Arc<dyn ConnectionLookup>,
    settings: FlowSettings,
    callback_path: String,
    exchange: TokenEndpointClient,
    validator: IdTokenValidator,
    userinfo: UserInfoClient,
    claims_processor: Arc<dyn ClaimsProcessor>,
}

impl CallbackProcessor {
    /// Creates a processor over the given connections and settings.
    ///
    /// Uses [`DefaultClaimsProcessor`] and a default JWKS cache; override
    /// either with the builder methods.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the settings are invalid or the HTTP
    /// client cannot be built.
    pub fn new(
        connections: Arc<dyn ConnectionLookup>,
        settings: FlowSettings,
        http: &HttpSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let callback_path = Url::parse(&settings.callback_uri)
            .map_err(|source| ConfigError::InvalidCallbackUri { source })?
            .path()
            .to_string();
        let http_client = http.build_client()?;

        Ok(Self {
            exchange: TokenEndpointClient::new(http_client.clone(), &settings),
            validator: IdTokenValidator::with_defaults(),
            userinfo: UserInfoClient::new(http_client),
            claims_processor: Arc::new(DefaultClaimsProcessor),
            connections,
            settings,
            callback_path,
        })
    }

    /// Replaces the JWKS cache backing ID token validation.
    ///
    /// Pass a shared cache when several components validate tokens for the
    /// same providers.
    #[must_use]
    pub fn with_jwks_cache(mut self, jwks: Arc<JwksCache>) -> Self {
        self.validator = IdTokenValidator::new(jwks);
        self
    }

    /// Replaces the claims processor.
    #[must_use]
    pub fn with_claims_processor(mut self, processor: Arc<dyn ClaimsProcessor>) -> Self {
        self.claims_processor = processor;
        self
    }

    /// Flow settings the processor runs with.
    #[must_use]
    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// Picks the connection for a new flow: the requested name when present
    /// and non-empty, the configured default otherwise.
    ///
    /// # Errors
    ///
    /// [`FlowError::InvalidConnection`] when neither is available,
    /// [`FlowError::UnknownConnection`] when the name is not registered.
    pub fn select_connection(
        &self,
        requested: Option<&str>,
    ) -> Result<ResolvedConnection, FlowError> {
        let name = requested
            .filter(|name| !name.is_empty())
            .or(self.settings.default_connection.as_deref())
            .ok_or(FlowError::InvalidConnection)?;
        self.connections.connection(name)
    }

    /// Starts a flow: builds the authorization redirect for the selected
    /// connection, carrying `redirect` as the post-login target.
    ///
    /// # Errors
    ///
    /// Connection selection errors, as in [`Self::select_connection`].
    pub fn begin_authorization(
        &self,
        connection: Option<&str>,
        redirect: Option<&str>,
    ) -> Result<AuthorizationRedirect, FlowError> {
        let connection = self.select_connection(connection)?;
        let mut request = AuthorizationRequest::new(&connection, &self.settings);
        if let Some(redirect) = redirect {
            request = request.with_redirect(redirect);
        }
        Ok(request.build())
    }

    /// Processes one callback request through the full verification chain.
    ///
    /// # Errors
    ///
    /// One [`FlowError`] per failing check; see the module docs for the
    /// check order and the error taxonomy in [`FlowError`].
    pub async fn process_callback(
        &self,
        request: &CallbackRequest,
    ) -> Result<VerifiedIdentity, FlowError> {
        // An unparseable URI or a different path means this request is not an
        // authorization response at all.
        let request_url =
            Url::parse(&request.uri).map_err(|_| FlowError::parse("request URI does not parse"))?;
        if request_url.path() != self.callback_path {
            return Err(FlowError::parse(
                "request does not target the callback endpoint",
            ));
        }

        let state = match request.param("state") {
            Some(raw) => FlowState::decode(raw).map_err(|_| FlowError::MissingState)?,
            None => return Err(FlowError::MissingState),
        };

        let code = request.param("code");
        let provider_error = request.param("error");
        if code.is_none() && provider_error.is_none() {
            return Err(FlowError::MissingCode);
        }

        let cookies = FlowCookies::parse(request.cookies.as_deref().unwrap_or(""));
        let request_key = cookies.require_request_key()?;
        let verifier = if self.settings.pkce_enabled {
            Some(cookies.require_code_verifier()?)
        } else {
            None
        };

        if !state.matches_request_key(request_key) {
            tracing::warn!(
                connection = %state.connection_name,
                "request key mismatch between state parameter and cookie"
            );
            return Err(FlowError::CsrfMismatch);
        }

        // Only now is the callback known to belong to a flow this handler
        // started; a provider denial is honored from here on.
        if let Some(error) = provider_error {
            tracing::warn!(
                connection = %state.connection_name,
                error = %error,
                "provider denied the authorization request"
            );
            return Err(FlowError::authorization_denied(
                error,
                request.param("error_description"),
            ));
        }
        let Some(code) = code else {
            return Err(FlowError::MissingCode);
        };

        if state.connection_name.is_empty() {
            return Err(FlowError::InvalidConnection);
        }
        let connection = self
            .connections
            .connection(&state.connection_name)
            .map_err(|_| FlowError::InvalidConnection)?;

        let response = self
            .exchange
            .exchange_code(&connection, code, verifier.as_ref())
            .await?;

        let id_token = response
            .id_token
            .as_deref()
            .ok_or_else(|| FlowError::invalid_id_token("token response carried no ID token"))?;
        let claims = self.validator.validate(id_token, &connection, None).await?;

        let user_info = if self.settings.user_info_enabled && connection.user_info_endpoint.is_some()
        {
            Some(self.userinfo.fetch(&connection, &response.access_token).await?)
        } else {
            None
        };

        let credentials = self
            .claims_processor
            .process(user_info.as_ref(), &response, &connection.name)
            .await;

        let now = OffsetDateTime::now_utc();
        let expires_at = response.expires_in.and_then(|secs| {
            let secs = i64::try_from(secs).ok()?;
            now.checked_add(Duration::seconds(secs))
        });
        let redirect_target = self
            .settings
            .effective_redirect(state.redirect.as_deref())
            .map(String::from);

        tracing::info!(
            connection = %connection.name,
            subject = %claims.sub,
            "authorization flow completed"
        );

        Ok(VerifiedIdentity {
            subject: claims.sub.clone(),
            connection: connection.name.clone(),
            claims,
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at,
            user_info,
            credentials,
            redirect_target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use jsonwebtoken::{Algorithm, EncodingKey, Header};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::ConnectionConfig;
    use crate::connection::ConnectionRegistry;
    use crate::identity::AuthCredentials;
    use crate::oauth::exchange::TokenResponse;
    use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
    use crate::oidc::claims::UserInfoClaims;
    use crate::oidc::jwks::JwksCacheConfig;

    const SECRET: &[u8] = b"latchkey-callback-test-secret-0123456789";
    const ISSUER: &str = "https://idp.example.com";
    const CLIENT_ID: &str = "client-id";
    const CALLBACK: &str = "https://app.example.com/callback";

    fn oct_jwks(secret: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "keys": [{
                "kty": "oct",
                "kid": "test-key",
                "alg": "HS256",
                "k": URL_SAFE_NO_PAD.encode(secret),
            }]
        })
    }

    fn mint_id_token(secret: &[u8]) -> String {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = serde_json::json!({
            "iss": ISSUER,
            "sub": "user-123",
            "aud": CLIENT_ID,
            "exp": now + 600,
            "iat": now - 10,
        });
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("test-key".to_string());
        jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn token_body(id_token: Option<String>) -> serde_json::Value {
        let mut body = serde_json::json!({
            "access_token": "at-1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt-1",
        });
        if let Some(id_token) = id_token {
            body["id_token"] = serde_json::json!(id_token);
        }
        body
    }

    async fn mount_jwks(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(oct_jwks(SECRET)))
            .mount(server)
            .await;
    }

    async fn mount_token_endpoint(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body(Some(mint_id_token(SECRET)))),
            )
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    async fn mount_userinfo(server: &MockServer, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "user-123",
                "email": "user@example.com",
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn connection_config(server: &MockServer, with_userinfo: bool) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(
            "corp",
            format!("{}/authorize", server.uri()),
            format!("{}/token", server.uri()),
            format!("{}/jwks", server.uri()),
            ISSUER,
            CLIENT_ID,
        )
        .with_client_secret("s3cr3t")
        .with_id_token_signing_alg("HS256");
        if with_userinfo {
            config = config.with_user_info_endpoint(format!("{}/userinfo", server.uri()));
        }
        config
    }

    fn processor_for(
        server: &MockServer,
        pkce_enabled: bool,
        user_info_enabled: bool,
        with_userinfo_endpoint: bool,
    ) -> CallbackProcessor {
        let registry =
            ConnectionRegistry::from_configs(&[connection_config(server, with_userinfo_endpoint)])
                .unwrap();
        let settings = FlowSettings::new(CALLBACK)
            .with_pkce(pkce_enabled)
            .with_user_info(user_info_enabled)
            .with_default_connection("corp");
        let jwks = Arc::new(JwksCache::new(
            JwksCacheConfig::default().with_allow_http(true),
        ));
        CallbackProcessor::new(Arc::new(registry), settings, &HttpSettings::default())
            .unwrap()
            .with_jwks_cache(jwks)
    }

    fn cookie_header(redirect: &AuthorizationRedirect) -> String {
        redirect
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn state_param(redirect: &AuthorizationRedirect) -> String {
        redirect
            .uri
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap()
    }

    fn callback_request(redirect: &AuthorizationRedirect, code: Option<&str>) -> CallbackRequest {
        let mut uri = format!("{CALLBACK}?state={}", state_param(redirect));
        if let Some(code) = code {
            uri.push_str(&format!("&code={code}"));
        }
        CallbackRequest::parse(uri, Some(&cookie_header(redirect))).unwrap()
    }

    #[tokio::test]
    async fn test_full_flow_completes() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        mount_token_endpoint(&server, 1).await;
        mount_userinfo(&server, 1).await;

        let processor = processor_for(&server, false, true, true);
        let redirect = processor
            .begin_authorization(Some("corp"), Some("/home"))
            .unwrap();
        let request = callback_request(&redirect, Some("code-1"));

        let identity = processor.process_callback(&request).await.unwrap();
        assert_eq!(identity.subject, "user-123");
        assert_eq!(identity.connection, "corp");
        assert_eq!(identity.auth_type(), "oidc");
        assert_eq!(identity.access_token, "at-1");
        assert_eq!(identity.refresh_token.as_deref(), Some("rt-1"));
        assert!(identity.expires_at.is_some());
        assert_eq!(identity.redirect_target(), Some("/home"));
        let user_info = identity.user_info.unwrap();
        assert_eq!(user_info.email.as_deref(), Some("user@example.com"));
    }

    #[tokio::test]
    async fn test_csrf_mismatch_blocks_exchange() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        mount_token_endpoint(&server, 0).await;

        let processor = processor_for(&server, false, false, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();

        // A syntactically plausible key that is not the staged one.
        let forged = format!("request-key={}", "A".repeat(43));
        let uri = format!("{CALLBACK}?state={}&code=code-1", state_param(&redirect));
        let request = CallbackRequest::parse(uri, Some(&forged)).unwrap();

        let err = processor.process_callback(&request).await.unwrap_err();
        assert!(matches!(err, FlowError::CsrfMismatch));
        assert!(err.is_security_violation());
    }

    #[tokio::test]
    async fn test_missing_request_key_cookie_blocks_exchange() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        mount_token_endpoint(&server, 0).await;

        let processor = processor_for(&server, false, false, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();
        let uri = format!("{CALLBACK}?state={}&code=code-1", state_param(&redirect));
        let request = CallbackRequest::parse(uri, None).unwrap();

        let err = processor.process_callback(&request).await.unwrap_err();
        assert!(matches!(err, FlowError::MissingCookie));
    }

    #[tokio::test]
    async fn test_missing_pkce_cookie_blocks_exchange() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        mount_token_endpoint(&server, 0).await;

        let processor = processor_for(&server, true, false, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();

        // Keep only the request-key cookie; drop the verifier.
        let request_key_cookie = redirect
            .cookies
            .iter()
            .find(|c| c.name() == "request-key")
            .map(|c| format!("{}={}", c.name(), c.value()))
            .unwrap();
        let uri = format!("{CALLBACK}?state={}&code=code-1", state_param(&redirect));
        let request = CallbackRequest::parse(uri, Some(&request_key_cookie)).unwrap();

        let err = processor.process_callback(&request).await.unwrap_err();
        assert!(matches!(err, FlowError::MissingPkceCookie));
        assert!(err.is_security_violation());
    }

    #[tokio::test]
    async fn test_missing_state_is_recoverable() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        mount_token_endpoint(&server, 0).await;

        let processor = processor_for(&server, false, false, false);
        let request =
            CallbackRequest::parse(format!("{CALLBACK}?code=code-1"), None).unwrap();

        let err = processor.process_callback(&request).await.unwrap_err();
        assert!(matches!(err, FlowError::MissingState));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_undecodable_state_is_recoverable() {
        let server = MockServer::start().await;
        let processor = processor_for(&server, false, false, false);
        let request = CallbackRequest::parse(
            format!("{CALLBACK}?state=%21%21not-base64&code=code-1"),
            None,
        )
        .unwrap();

        let err = processor.process_callback(&request).await.unwrap_err();
        assert!(matches!(err, FlowError::MissingState));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_other_path_is_recoverable() {
        let server = MockServer::start().await;
        let processor = processor_for(&server, false, false, false);
        let request = CallbackRequest::parse(
            "https://app.example.com/other?code=code-1".to_string(),
            None,
        )
        .unwrap();

        let err = processor.process_callback(&request).await.unwrap_err();
        assert!(matches!(err, FlowError::ParseError { .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_missing_code_without_provider_error() {
        let server = MockServer::start().await;
        let processor = processor_for(&server, false, false, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();
        let request = callback_request(&redirect, None);

        let err = processor.process_callback(&request).await.unwrap_err();
        assert!(matches!(err, FlowError::MissingCode));
    }

    #[tokio::test]
    async fn test_provider_denial_surfaces_after_csrf_check() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 0).await;

        let processor = processor_for(&server, false, false, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();

        let uri = format!(
            "{CALLBACK}?state={}&error=access_denied&error_description=User+cancelled",
            state_param(&redirect)
        );
        let request = CallbackRequest::parse(uri, Some(&cookie_header(&redirect))).unwrap();

        let err = processor.process_callback(&request).await.unwrap_err();
        match err {
            FlowError::AuthorizationDenied { error, description } => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("User cancelled"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_forged_denial_still_needs_matching_cookie() {
        let server = MockServer::start().await;
        let processor = processor_for(&server, false, false, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();

        let forged = format!("request-key={}", "B".repeat(43));
        let uri = format!(
            "{CALLBACK}?state={}&error=access_denied",
            state_param(&redirect)
        );
        let request = CallbackRequest::parse(uri, Some(&forged)).unwrap();

        let err = processor.process_callback(&request).await.unwrap_err();
        assert!(matches!(err, FlowError::CsrfMismatch));
    }

    #[tokio::test]
    async fn test_unknown_connection_in_state_rejected() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 0).await;

        let processor = processor_for(&server, false, false, false);

        // Craft state for a connection this processor does not know, with a
        // matching cookie so the CSRF check passes.
        let state = FlowState::new("ghost");
        let cookie = format!("request-key={}", state.per_request_key);
        let uri = format!("{CALLBACK}?state={}&code=code-1", state.encode());
        let request = CallbackRequest::parse(uri, Some(&cookie)).unwrap();

        let err = processor.process_callback(&request).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidConnection));
    }

    #[tokio::test]
    async fn test_userinfo_disabled_skips_endpoint() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        mount_token_endpoint(&server, 1).await;
        mount_userinfo(&server, 0).await;

        let processor = processor_for(&server, false, false, true);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();
        let request = callback_request(&redirect, Some("code-1"));

        let identity = processor.process_callback(&request).await.unwrap();
        assert!(identity.user_info.is_none());
    }

    #[tokio::test]
    async fn test_userinfo_enabled_without_endpoint_skips() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        mount_token_endpoint(&server, 1).await;

        let processor = processor_for(&server, false, true, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();
        let request = callback_request(&redirect, Some("code-1"));

        let identity = processor.process_callback(&request).await.unwrap();
        assert!(identity.user_info.is_none());
    }

    #[tokio::test]
    async fn test_claims_processor_called_once_with_verified_inputs() {
        struct CountingProcessor {
            calls: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl ClaimsProcessor for CountingProcessor {
            async fn process(
                &self,
                user_info: Option<&UserInfoClaims>,
                tokens: &TokenResponse,
                connection: &str,
            ) -> AuthCredentials {
                self.calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(connection, "corp");
                assert_eq!(tokens.access_token, "at-1");
                let email = user_info.and_then(|u| u.email.clone()).unwrap();
                AuthCredentials::default().with_subject(email)
            }
        }

        let server = MockServer::start().await;
        mount_jwks(&server).await;
        mount_token_endpoint(&server, 1).await;
        mount_userinfo(&server, 1).await;

        let counting = Arc::new(CountingProcessor {
            calls: AtomicUsize::new(0),
        });
        let processor = processor_for(&server, false, true, true)
            .with_claims_processor(Arc::clone(&counting) as Arc<dyn ClaimsProcessor>);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();
        let request = callback_request(&redirect, Some("code-1"));

        let identity = processor.process_callback(&request).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            identity.credentials.subject.as_deref(),
            Some("user@example.com")
        );
        // The OIDC subject stays authoritative regardless of the mapping.
        assert_eq!(identity.subject, "user-123");
    }

    #[tokio::test]
    async fn test_tampered_id_token_rejected() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(Some(
                mint_id_token(b"a-different-signing-secret"),
            ))))
            .mount(&server)
            .await;

        let processor = processor_for(&server, false, false, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();
        let request = callback_request(&redirect, Some("code-1"));

        let err = processor.process_callback(&request).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidIdToken { .. }));
    }

    #[tokio::test]
    async fn test_missing_id_token_rejected() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(None)))
            .mount(&server)
            .await;

        let processor = processor_for(&server, false, false, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();
        let request = callback_request(&redirect, Some("code-1"));

        let err = processor.process_callback(&request).await.unwrap_err();
        match err {
            FlowError::InvalidIdToken { reason } => assert!(reason.contains("no ID token")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_replayed_callback_fails_at_the_provider() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body(Some(mint_id_token(SECRET)))),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "code already redeemed",
            })))
            .mount(&server)
            .await;

        let processor = processor_for(&server, false, false, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();
        let request = callback_request(&redirect, Some("code-1"));

        processor.process_callback(&request).await.unwrap();

        // The cookies are still presentable; single-use codes are the
        // provider's contract, and the replay dies there.
        let err = processor.process_callback(&request).await.unwrap_err();
        match err {
            FlowError::TokenExchange { error, .. } => assert_eq!(error, "invalid_grant"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_rejection_surfaces() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
            })))
            .mount(&server)
            .await;

        let processor = processor_for(&server, false, false, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();
        let request = callback_request(&redirect, Some("stale-code"));

        let err = processor.process_callback(&request).await.unwrap_err();
        match err {
            FlowError::TokenExchange { error, .. } => assert_eq!(error, "invalid_grant"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_pkce_flow_replays_cookie_verifier() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        mount_token_endpoint(&server, 1).await;

        let processor = processor_for(&server, true, false, false);
        let redirect = processor.begin_authorization(Some("corp"), None).unwrap();

        let verifier_value = redirect
            .cookies
            .iter()
            .find(|c| c.name() == "code-verifier")
            .map(|c| c.value().to_string())
            .unwrap();
        let challenge_in_url = redirect
            .uri
            .query_pairs()
            .find(|(key, _)| key == "code_challenge")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        let verifier = PkceVerifier::new(verifier_value.clone()).unwrap();
        assert_eq!(
            challenge_in_url,
            PkceChallenge::from_verifier(&verifier).into_inner()
        );

        let request = callback_request(&redirect, Some("code-1"));
        processor.process_callback(&request).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let token_request = requests
            .iter()
            .find(|r| r.url.path() == "/token")
            .unwrap();
        let body = String::from_utf8(token_request.body.clone()).unwrap();
        assert!(body.contains(&format!("code_verifier={verifier_value}")));
        assert!(body.contains("client_id=client-id"));
        assert!(!body.contains("s3cr3t"));
    }

    #[tokio::test]
    async fn test_select_connection_precedence() {
        let server = MockServer::start().await;
        let processor = processor_for(&server, false, false, false);

        assert_eq!(
            processor.select_connection(Some("corp")).unwrap().name,
            "corp"
        );
        // Blank falls back to the default.
        assert_eq!(processor.select_connection(Some("")).unwrap().name, "corp");
        assert_eq!(processor.select_connection(None).unwrap().name, "corp");
        assert!(matches!(
            processor.select_connection(Some("ghost")),
            Err(FlowError::UnknownConnection { .. })
        ));
    }

    #[tokio::test]
    async fn test_select_connection_without_default() {
        let server = MockServer::start().await;
        let registry =
            ConnectionRegistry::from_configs(&[connection_config(&server, false)]).unwrap();
        let settings = FlowSettings::new(CALLBACK);
        let processor =
            CallbackProcessor::new(Arc::new(registry), settings, &HttpSettings::default())
                .unwrap();

        assert!(matches!(
            processor.select_connection(None),
            Err(FlowError::InvalidConnection)
        ));
    }

    #[test]
    fn test_callback_request_param_first_occurrence_wins() {
        let request = CallbackRequest::parse(
            "https://app.example.com/callback?code=first&code=second&state=s",
            None,
        )
        .unwrap();
        assert_eq!(request.param("code"), Some("first"));
        assert_eq!(request.param("state"), Some("s"));
        assert_eq!(request.param("missing"), None);
    }

    #[test]
    fn test_callback_request_debug_redacts() {
        let request = CallbackRequest::parse(
            "https://app.example.com/callback?code=super-secret-code&state=s",
            Some("request-key=secret-cookie"),
        )
        .unwrap();
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("super-secret-code"));
        assert!(!rendered.contains("secret-cookie"));
    }
}
