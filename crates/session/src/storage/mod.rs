//! Persistence of the pending login and of sessions.
//!
//! Everything is stored as JSON strings in a [`KeyValueStore`]. Two typed
//! views sit on top of the raw store:
//!
//! - [`StateStorage`]: the single pending [`AuthState`], under `AuthState`
//! - [`SessionStorage`]: one [`StoredSession`] per client id
//!
//! Store failures are passed through unchanged; nothing here retries.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::auth::traits::{PendingStateStore, SessionStore};
use crate::auth::types::{AuthState, StoredSession};
use crate::error::StorageError;

#[cfg(feature = "keychain")]
mod keychain;
mod memory;

#[cfg(feature = "keychain")]
pub use keychain::KeychainStore;
pub use memory::MemoryStore;

/// Key of the pending login attempt.
pub const AUTH_STATE_KEY: &str = "AuthState";

const SESSION_KEY_PREFIX: &str = "session.";

/// String key/value backend.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Decode the JSON value stored under `key`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Store `value` as JSON under `key`.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw).await
}

/// Pending-state store over a [`KeyValueStore`].
///
/// Holds a single attempt: saving a new one replaces the previous one.
#[derive(Clone)]
pub struct StateStorage {
    store: Arc<dyn KeyValueStore>,
}

impl StateStorage {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PendingStateStore for StateStorage {
    async fn save_state(&self, state: &AuthState) -> Result<(), StorageError> {
        debug!("Storing pending login state");
        set_json(self.store.as_ref(), AUTH_STATE_KEY, state).await
    }

    async fn load_state(&self) -> Result<Option<AuthState>, StorageError> {
        get_json(self.store.as_ref(), AUTH_STATE_KEY).await
    }

    async fn clear_state(&self) -> Result<(), StorageError> {
        self.store.delete(AUTH_STATE_KEY).await
    }
}

/// Session store over a [`KeyValueStore`], keyed by client id.
#[derive(Clone)]
pub struct SessionStorage {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStorage {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Storage key of the session for `client_id`.
    #[must_use]
    pub fn key_for(client_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}{client_id}")
    }
}

#[async_trait]
impl SessionStore for SessionStorage {
    async fn load_session(&self, client_id: &str) -> Result<Option<StoredSession>, StorageError> {
        get_json(self.store.as_ref(), &Self::key_for(client_id)).await
    }

    async fn save_session(&self, session: &StoredSession) -> Result<(), StorageError> {
        debug!(client_id = %session.client_id, "Storing session");
        set_json(self.store.as_ref(), &Self::key_for(&session.client_id), session).await
    }

    async fn delete_session(&self, client_id: &str) -> Result<(), StorageError> {
        debug!(client_id = %client_id, "Deleting stored session");
        self.store.delete(&Self::key_for(client_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, FailingStore};

    #[tokio::test]
    async fn state_storage_round_trip_and_clear() {
        let store = Arc::new(MemoryStore::new());
        let states = StateStorage::new(store.clone());

        assert_eq!(states.load_state().await.unwrap(), None);

        let state = AuthState::new("s1", "n1", "v1", None);
        states.save_state(&state).await.unwrap();
        assert!(store.contains(AUTH_STATE_KEY));
        assert_eq!(states.load_state().await.unwrap(), Some(state));

        states.clear_state().await.unwrap();
        assert_eq!(states.load_state().await.unwrap(), None);
    }

    #[tokio::test]
    async fn state_storage_last_write_wins() {
        let states = StateStorage::new(Arc::new(MemoryStore::new()));

        states.save_state(&AuthState::new("first", "n1", "v1", None)).await.unwrap();
        states.save_state(&AuthState::new("second", "n2", "v2", None)).await.unwrap();

        let loaded = states.load_state().await.unwrap().unwrap();
        assert_eq!(loaded.state, "second");
    }

    #[tokio::test]
    async fn session_storage_is_keyed_by_client_id() {
        let store = Arc::new(MemoryStore::new());
        let sessions = SessionStorage::new(store.clone());

        let session = StoredSession::new("client-a", fixtures::token_set("at-1", Some("rt-1")));
        sessions.save_session(&session).await.unwrap();

        assert!(store.contains("session.client-a"));
        assert_eq!(sessions.load_session("client-a").await.unwrap(), Some(session));
        assert_eq!(sessions.load_session("client-b").await.unwrap(), None);

        sessions.delete_session("client-a").await.unwrap();
        assert_eq!(sessions.load_session("client-a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_record_is_a_storage_error() {
        let store = Arc::new(MemoryStore::new());
        store.set(&SessionStorage::key_for("client-a"), "{not json").await.unwrap();

        let result = SessionStorage::new(store).load_session("client-a").await;
        assert!(matches!(result, Err(StorageError::UnexpectedError(_))));
    }

    #[tokio::test]
    async fn store_failures_pass_through_unchanged() {
        let sessions = SessionStorage::new(Arc::new(FailingStore::new("disk on fire")));

        let result = sessions.load_session("client-a").await;
        assert_eq!(result, Err(StorageError::unexpected("disk on fire")));
    }
}
