//! Token storage traits.
//!
//! The flow itself is stateless between requests; durable tokens live behind
//! [`TokenStore`], keyed by (connection, identity). Hosts bring their own
//! backend (database, session store); [`InMemoryTokenStore`] ships for tests
//! and embedded development.
//!
//! # Security Considerations
//!
//! - Stored values are bearer secrets; backends own at-rest protection.
//! - [`StoredToken`] and [`PersistedTokens`] redact token values in `Debug`.
//! - Concurrent refreshes for one entry must be serialized through
//!   [`TokenStore::refresh_guard`] so a slow refresh cannot overwrite a newer
//!   token set.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::PersistedTokens;

pub mod memory;

pub use memory::InMemoryTokenStore;

/// Lifecycle state of one stored token at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Present and not expired.
    Valid,
    /// Not present.
    Missing,
    /// Present but past its expiry.
    Expired,
}

/// One token as read from the store, with its computed state.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredToken {
    /// The token value, when one is stored.
    pub value: Option<String>,
    /// State computed by the store at read time.
    pub state: TokenState,
}

impl StoredToken {
    /// A present, unexpired token.
    #[must_use]
    pub fn valid(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            state: TokenState::Valid,
        }
    }

    /// No token stored.
    #[must_use]
    pub fn missing() -> Self {
        Self {
            value: None,
            state: TokenState::Missing,
        }
    }

    /// A stored token past its expiry.
    #[must_use]
    pub fn expired(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            state: TokenState::Expired,
        }
    }

    /// The token value, but only when the state is [`TokenState::Valid`] and
    /// a value is actually present.
    #[must_use]
    pub fn usable(&self) -> Option<&str> {
        match self.state {
            TokenState::Valid => self.value.as_deref(),
            TokenState::Missing | TokenState::Expired => None,
        }
    }
}

// Token material stays out of Debug output.
impl fmt::Debug for StoredToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredToken")
            .field("value", &self.value.as_ref().map(|_| ".."))
            .field("state", &self.state)
            .finish()
    }
}

/// Storage backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not complete the operation.
    #[error("token store backend failure: {reason}")]
    Backend { reason: String },
}

impl StoreError {
    /// Creates a [`StoreError::Backend`].
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }
}

/// Guard serializing refresh operations for one (connection, identity) entry.
///
/// Dropped when the refresh attempt finishes, letting the next waiter in.
pub type RefreshGuard = tokio::sync::OwnedMutexGuard<()>;

/// Storage interface for durable access and refresh tokens.
///
/// Keys are (connection name, identity subject). Reads return the token with
/// its state computed at read time, so callers never re-derive expiry.
///
/// # Example Implementation
///
/// ```ignore
/// struct SessionBackedStore {
///     sessions: SessionHandle,
/// }
///
/// #[async_trait::async_trait]
/// impl TokenStore for SessionBackedStore {
///     async fn access_token(&self, connection: &str, identity: &str)
///         -> Result<StoredToken, StoreError> {
///         // read the session attribute, compare expiry against now
///     }
///     // ... other methods
/// }
/// ```
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Reads the stored access token for the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    async fn access_token(&self, connection: &str, identity: &str)
    -> Result<StoredToken, StoreError>;

    /// Reads the stored refresh token for the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    async fn refresh_token(
        &self,
        connection: &str,
        identity: &str,
    ) -> Result<StoredToken, StoreError>;

    /// Replaces the entry's token set.
    ///
    /// Called after every successful code exchange or refresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    async fn persist(
        &self,
        connection: &str,
        identity: &str,
        tokens: &PersistedTokens,
    ) -> Result<(), StoreError>;

    /// Acquires the refresh lock for the entry.
    ///
    /// Callers hold the returned guard across one read-refresh-persist cycle.
    /// Implementations must hand out contending guards for equal keys and
    /// independent guards for distinct keys. This serializes refreshes within
    /// one process; multi-process deployments also need backend-level
    /// serialization.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot provide the lock.
    async fn refresh_guard(
        &self,
        connection: &str,
        identity: &str,
    ) -> Result<RefreshGuard, StoreError>;
}
