//! In-memory token store.
//!
//! Backs tests and embedded development; nothing survives process restart.
//! Token state is computed at read time from the persisted expiry, so a
//! token that was valid when written reads back as expired once its time
//! passes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

use crate::storage::{RefreshGuard, StoreError, StoredToken, TokenStore};
use crate::types::PersistedTokens;

type EntryKey = (String, String);

fn entry_key(connection: &str, identity: &str) -> EntryKey {
    (connection.to_string(), identity.to_string())
}

/// Token store holding everything in process memory.
#[derive(Default)]
pub struct InMemoryTokenStore {
    entries: RwLock<HashMap<EntryKey, PersistedTokens>>,
    locks: Mutex<HashMap<EntryKey, Arc<Mutex<()>>>>,
}

impl InMemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops the entry for (connection, identity), if present.
    pub async fn remove(&self, connection: &str, identity: &str) {
        self.entries
            .write()
            .await
            .remove(&entry_key(connection, identity));
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn access_token(
        &self,
        connection: &str,
        identity: &str,
    ) -> Result<StoredToken, StoreError> {
        let entries = self.entries.read().await;
        let Some(tokens) = entries.get(&entry_key(connection, identity)) else {
            return Ok(StoredToken::missing());
        };

        if tokens.access_token_expired(OffsetDateTime::now_utc()) {
            Ok(StoredToken::expired(tokens.access_token.clone()))
        } else {
            Ok(StoredToken::valid(tokens.access_token.clone()))
        }
    }

    async fn refresh_token(
        &self,
        connection: &str,
        identity: &str,
    ) -> Result<StoredToken, StoreError> {
        let entries = self.entries.read().await;
        if let Some(tokens) = entries.get(&entry_key(connection, identity))
            && let Some(refresh_token) = &tokens.refresh_token
        {
            return Ok(StoredToken::valid(refresh_token.clone()));
        }
        Ok(StoredToken::missing())
    }

    async fn persist(
        &self,
        connection: &str,
        identity: &str,
        tokens: &PersistedTokens,
    ) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(entry_key(connection, identity), tokens.clone());
        Ok(())
    }

    async fn refresh_guard(
        &self,
        connection: &str,
        identity: &str,
    ) -> Result<RefreshGuard, StoreError> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(entry_key(connection, identity))
                .or_default()
                .clone()
        };
        Ok(lock.lock_owned().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use time::Duration as TimeDuration;

    use crate::storage::TokenState;

    fn tokens(
        access_token: &str,
        expires_at: Option<OffsetDateTime>,
        refresh_token: Option<&str>,
    ) -> PersistedTokens {
        PersistedTokens {
            access_token: access_token.to_string(),
            expires_at,
            refresh_token: refresh_token.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_empty_store_reports_missing() {
        let store = InMemoryTokenStore::new();

        let access = store.access_token("corp", "user-1").await.unwrap();
        assert_eq!(access.state, TokenState::Missing);
        assert!(access.value.is_none());

        let refresh = store.refresh_token("corp", "user-1").await.unwrap();
        assert_eq!(refresh.state, TokenState::Missing);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_persist_then_read_valid() {
        let store = InMemoryTokenStore::new();
        let expires_at = OffsetDateTime::now_utc() + TimeDuration::hours(1);
        store
            .persist("corp", "user-1", &tokens("at-1", Some(expires_at), Some("rt-1")))
            .await
            .unwrap();

        let access = store.access_token("corp", "user-1").await.unwrap();
        assert_eq!(access.state, TokenState::Valid);
        assert_eq!(access.usable(), Some("at-1"));

        let refresh = store.refresh_token("corp", "user-1").await.unwrap();
        assert_eq!(refresh.usable(), Some("rt-1"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_access_token_reported() {
        let store = InMemoryTokenStore::new();
        let expires_at = OffsetDateTime::now_utc() - TimeDuration::minutes(1);
        store
            .persist("corp", "user-1", &tokens("at-1", Some(expires_at), Some("rt-1")))
            .await
            .unwrap();

        let access = store.access_token("corp", "user-1").await.unwrap();
        assert_eq!(access.state, TokenState::Expired);
        // The value stays readable for diagnostics, but never as usable.
        assert_eq!(access.value.as_deref(), Some("at-1"));
        assert!(access.usable().is_none());

        // Refresh tokens carry no expiry of their own.
        let refresh = store.refresh_token("corp", "user-1").await.unwrap();
        assert_eq!(refresh.state, TokenState::Valid);
    }

    #[tokio::test]
    async fn test_token_without_lifetime_stays_valid() {
        let store = InMemoryTokenStore::new();
        store
            .persist("corp", "user-1", &tokens("at-1", None, None))
            .await
            .unwrap();

        let access = store.access_token("corp", "user-1").await.unwrap();
        assert_eq!(access.state, TokenState::Valid);

        let refresh = store.refresh_token("corp", "user-1").await.unwrap();
        assert_eq!(refresh.state, TokenState::Missing);
    }

    #[tokio::test]
    async fn test_persist_replaces_entry() {
        let store = InMemoryTokenStore::new();
        store
            .persist("corp", "user-1", &tokens("at-old", None, Some("rt-old")))
            .await
            .unwrap();
        store
            .persist("corp", "user-1", &tokens("at-new", None, Some("rt-new")))
            .await
            .unwrap();

        let access = store.access_token("corp", "user-1").await.unwrap();
        assert_eq!(access.usable(), Some("at-new"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_entries_keyed_per_connection_and_identity() {
        let store = InMemoryTokenStore::new();
        store
            .persist("corp", "user-1", &tokens("at-corp", None, None))
            .await
            .unwrap();
        store
            .persist("partner", "user-1", &tokens("at-partner", None, None))
            .await
            .unwrap();

        let corp = store.access_token("corp", "user-1").await.unwrap();
        let partner = store.access_token("partner", "user-1").await.unwrap();
        assert_eq!(corp.usable(), Some("at-corp"));
        assert_eq!(partner.usable(), Some("at-partner"));

        let other_user = store.access_token("corp", "user-2").await.unwrap();
        assert_eq!(other_user.state, TokenState::Missing);

        store.remove("corp", "user-1").await;
        let removed = store.access_token("corp", "user-1").await.unwrap();
        assert_eq!(removed.state, TokenState::Missing);
    }

    #[tokio::test]
    async fn test_refresh_guard_serializes_same_entry() {
        let store = Arc::new(InMemoryTokenStore::new());

        let guard = store.refresh_guard("corp", "user-1").await.unwrap();

        let contender = Arc::clone(&store);
        let handle =
            tokio::spawn(async move { contender.refresh_guard("corp", "user-1").await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        drop(guard);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_refresh_guard_independent_entries() {
        let store = InMemoryTokenStore::new();

        let _corp = store.refresh_guard("corp", "user-1").await.unwrap();
        // A different entry locks independently.
        let _partner = store.refresh_guard("partner", "user-1").await.unwrap();
        let _other_user = store.refresh_guard("corp", "user-2").await.unwrap();
    }
}
