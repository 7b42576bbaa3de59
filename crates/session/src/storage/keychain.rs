//! Platform keychain backend
//!
//! Stores each key as one credential of a keychain service: Keychain Access
//! on macOS, Credential Manager on Windows and the Secret Service API on
//! Linux. The keyring calls are blocking, so they run on tokio's blocking
//! pool.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use loginflow_session::storage::{KeychainStore, SessionStorage};
//!
//! let store = Arc::new(KeychainStore::new("com.example.app.login"));
//! let sessions = SessionStorage::new(store);
//! ```

use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use super::KeyValueStore;
use crate::error::StorageError;

/// [`KeyValueStore`] backed by the platform keychain.
#[derive(Debug, Clone)]
pub struct KeychainStore {
    service_name: String,
}

impl KeychainStore {
    /// Store credentials under keychain service `service_name`.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into() }
    }

    /// Keychain service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, StorageError> + Send + 'static,
    {
        let service = self.service_name.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &key).map_err(|e| {
                StorageError::unexpected(format!("Failed to open keychain entry {key}: {e}"))
            })?;
            op(entry)
        })
        .await
        .map_err(|e| StorageError::unexpected(format!("Keychain task failed: {e}")))?
    }
}

#[async_trait]
impl KeyValueStore for KeychainStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        debug!(service = %self.service_name, key = %key, "Reading keychain entry");

        let owned = key.to_string();
        self.with_entry(key, move |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StorageError::unexpected(format!("Failed to read {owned}: {e}"))),
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        debug!(service = %self.service_name, key = %key, "Writing keychain entry");

        let owned = key.to_string();
        let value = value.to_string();
        self.with_entry(key, move |entry| {
            entry
                .set_password(&value)
                .map_err(|e| StorageError::unexpected(format!("Failed to store {owned}: {e}")))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        debug!(service = %self.service_name, key = %key, "Deleting keychain entry");

        let owned = key.to_string();
        self.with_entry(key, move |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::unexpected(format!("Failed to delete {owned}: {e}"))),
        })
        .await
    }
}
