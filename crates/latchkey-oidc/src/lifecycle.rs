//! Access-token lifecycle management for protected requests.
//!
//! Once a flow has completed and its tokens are persisted, every subsequent
//! protected request asks [`TokenLifecycleManager::check`] what to do: serve
//! the request with the stored access token, refresh it first, or send the
//! user back through authorization. The manager owns the refresh grant; hosts
//! only act on the returned [`LifecycleDecision`].
//!
//! Refreshes for one (connection, identity) entry are serialized through the
//! store's refresh guard, so parallel requests hitting an expired token
//! produce a single refresh call.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;

use crate::config::{ConfigError, FlowSettings, HttpSettings};
use crate::connection::{ConnectionLookup, ResolvedConnection};
use crate::error::FlowError;
use crate::oauth::authorize::{AuthorizationRedirect, AuthorizationRequest};
use crate::oauth::exchange::TokenEndpointClient;
use crate::storage::{StoreError, TokenState, TokenStore};
use crate::types::PersistedTokens;

/// What the host should do with the current protected request.
pub enum LifecycleDecision {
    /// Serve the request; the access token is valid.
    Proceed {
        /// Access token to present downstream.
        access_token: String,
    },
    /// No usable token set; send the user through authorization.
    Authenticate {
        /// Redirect to emit, with its flow cookies.
        redirect: AuthorizationRedirect,
    },
}

// Access tokens stay out of Debug output.
impl fmt::Debug for LifecycleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proceed { .. } => f
                .debug_struct("Proceed")
                .field("access_token", &"..")
                .finish(),
            Self::Authenticate { redirect } => f
                .debug_struct("Authenticate")
                .field("redirect", redirect)
                .finish(),
        }
    }
}

/// Failures the lifecycle manager cannot absorb.
///
/// Refresh failures are not here: IO errors and provider rejections on the
/// refresh grant degrade to [`LifecycleDecision::Authenticate`].
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The named connection is not registered.
    #[error(transparent)]
    Connection(FlowError),

    /// The token store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Decides, per request, whether stored tokens still authorize access.
///
/// States per (connection, identity) entry as read from the store:
///
/// - `Valid` access token → [`LifecycleDecision::Proceed`];
/// - `Missing` → [`LifecycleDecision::Authenticate`] with the current request
///   path carried as the post-login redirect target;
/// - `Expired` → refresh grant when a valid refresh token is stored,
///   otherwise authenticate. A failed refresh is logged and degrades to
///   authenticate; a stale token is never handed out.
pub struct TokenLifecycleManager {
    store: Arc<dyn TokenStore>,
    connections: Arc<dyn ConnectionLookup>,
    settings: FlowSettings,
    exchange: TokenEndpointClient,
}

impl TokenLifecycleManager {
    /// Creates a manager over the given store and connections.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the settings are invalid or the HTTP
    /// client cannot be built.
    pub fn new(
        store: Arc<dyn TokenStore>,
        connections: Arc<dyn ConnectionLookup>,
        settings: FlowSettings,
        http: &HttpSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let http_client = http.build_client()?;

        Ok(Self {
            exchange: TokenEndpointClient::new(http_client, &settings),
            store,
            connections,
            settings,
        })
    }

    /// Checks the stored tokens for (`connection_name`, `identity`) before a
    /// protected request, refreshing if necessary.
    ///
    /// `current_path` becomes the post-login redirect target when the
    /// decision is to authenticate.
    ///
    /// The check presumes an already-authenticated user: hosts reject
    /// anonymous requests (401) before consulting the manager, since
    /// `identity` is the subject established by a completed flow.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the connection is unknown or the store
    /// fails; refresh failures do not error, they degrade to
    /// [`LifecycleDecision::Authenticate`].
    pub async fn check(
        &self,
        connection_name: &str,
        identity: &str,
        current_path: &str,
    ) -> Result<LifecycleDecision, LifecycleError> {
        let connection = self
            .connections
            .connection(connection_name)
            .map_err(LifecycleError::Connection)?;

        let access = self.store.access_token(connection_name, identity).await?;
        if let Some(token) = access.usable() {
            return Ok(LifecycleDecision::Proceed {
                access_token: token.to_owned(),
            });
        }
        if access.state != TokenState::Expired {
            tracing::debug!(
                connection = %connection.name,
                "no stored access token, starting authorization"
            );
            return Ok(self.authenticate(&connection, current_path));
        }

        self.refresh_expired(&connection, identity, current_path)
            .await
    }

    /// Refresh path: runs under the store's per-entry guard so concurrent
    /// requests produce one refresh.
    async fn refresh_expired(
        &self,
        connection: &ResolvedConnection,
        identity: &str,
        current_path: &str,
    ) -> Result<LifecycleDecision, LifecycleError> {
        let _guard = self.store.refresh_guard(&connection.name, identity).await?;

        // Another request may have refreshed while this one waited.
        let access = self.store.access_token(&connection.name, identity).await?;
        if let Some(token) = access.usable() {
            return Ok(LifecycleDecision::Proceed {
                access_token: token.to_owned(),
            });
        }

        let refresh = self.store.refresh_token(&connection.name, identity).await?;
        let Some(refresh_token) = refresh.usable() else {
            tracing::debug!(
                connection = %connection.name,
                "access token expired with no usable refresh token"
            );
            return Ok(self.authenticate(connection, current_path));
        };

        match self.exchange.refresh(connection, refresh_token).await {
            Ok(response) => {
                let tokens = PersistedTokens::from_response(&response, OffsetDateTime::now_utc())
                    .carry_refresh_token(Some(refresh_token.to_owned()));
                let access_token = tokens.access_token.clone();
                self.store
                    .persist(&connection.name, identity, &tokens)
                    .await?;
                tracing::debug!(connection = %connection.name, "access token refreshed");
                Ok(LifecycleDecision::Proceed { access_token })
            }
            Err(error) => {
                tracing::warn!(
                    connection = %connection.name,
                    error = %error,
                    "token refresh failed, starting authorization"
                );
                Ok(self.authenticate(connection, current_path))
            }
        }
    }

    fn authenticate(
        &self,
        connection: &ResolvedConnection,
        current_path: &str,
    ) -> LifecycleDecision {
        let redirect = AuthorizationRequest::new(connection, &self.settings)
            .with_redirect(current_path)
            .build();
        LifecycleDecision::Authenticate { redirect }
    }
}
