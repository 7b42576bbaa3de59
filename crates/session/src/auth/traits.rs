//! Collaborator contracts of the login flow.
//!
//! The token endpoint, both stores and the event sink are injected as trait
//! objects so the flow can be driven by mocks in tests and by other backends
//! in production.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::types::{AuthState, StoredSession, TokenSet};
use crate::error::{StorageError, TokenError};

/// Network calls against the OAuth token endpoint.
#[async_trait]
pub trait TokenEndpointClient: Send + Sync {
    /// Exchange an authorization code for tokens
    ///
    /// # Arguments
    /// * `code` - Authorization code from the redirect
    /// * `code_verifier` - PKCE verifier of the pending login
    /// * `nonce` - Nonce the ID token must carry
    ///
    /// # Errors
    /// Returns `TokenError::OAuth` when the endpoint answers with an OAuth
    /// error body, other variants for transport or decoding failures
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        nonce: &str,
    ) -> Result<TokenSet, TokenError>;

    /// Refresh the given tokens
    ///
    /// The current set is passed whole so values the endpoint does not
    /// reissue (refresh token, ID token) can be carried over.
    ///
    /// # Errors
    /// Returns `TokenError::NoRefreshToken` when `current` holds no refresh
    /// token, `TokenError::OAuth` with `invalid_grant` when it was rejected
    async fn refresh(&self, current: &TokenSet) -> Result<TokenSet, TokenError>;
}

/// Storage for the single in-flight login attempt.
#[async_trait]
pub trait PendingStateStore: Send + Sync {
    /// Store the pending attempt, replacing any previous one.
    async fn save_state(&self, state: &AuthState) -> Result<(), StorageError>;

    /// Load the pending attempt, if any.
    async fn load_state(&self) -> Result<Option<AuthState>, StorageError>;

    /// Forget the pending attempt.
    async fn clear_state(&self) -> Result<(), StorageError>;
}

/// Storage for persisted sessions, one per client id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session stored for `client_id`. Absence is `Ok(None)`.
    async fn load_session(&self, client_id: &str) -> Result<Option<StoredSession>, StorageError>;

    /// Write `session` under its own client id.
    async fn save_session(&self, session: &StoredSession) -> Result<(), StorageError>;

    /// Remove the session stored for `client_id`.
    async fn delete_session(&self, client_id: &str) -> Result<(), StorageError>;
}

/// Login/logout notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A login completed
    LoggedIn {
        /// Subject of the new session
        uuid: String,
    },
    /// A session was logged out
    LoggedOut,
}

/// Optional sink for session events, passed in at construction.
///
/// Called synchronously from the task that caused the event; implementations
/// must not block.
pub trait SessionObserver: Send + Sync {
    /// Receive one event.
    fn on_event(&self, event: &SessionEvent);
}

/// [`SessionObserver`] that fans events out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<SessionEvent>,
}

impl BroadcastObserver {
    /// Channel holding up to `capacity` undelivered events per receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New receiver seeing events sent from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new(16)
    }
}

impl SessionObserver for BroadcastObserver {
    fn on_event(&self, event: &SessionEvent) {
        // No receivers is fine
        let _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_observer_delivers_to_subscribers() {
        let observer = BroadcastObserver::default();
        let mut first = observer.subscribe();
        let mut second = observer.subscribe();

        observer.on_event(&SessionEvent::LoggedIn { uuid: "u1".to_string() });
        observer.on_event(&SessionEvent::LoggedOut);

        assert_eq!(first.recv().await.unwrap(), SessionEvent::LoggedIn { uuid: "u1".to_string() });
        assert_eq!(first.recv().await.unwrap(), SessionEvent::LoggedOut);
        assert_eq!(second.recv().await.unwrap(), SessionEvent::LoggedIn { uuid: "u1".to_string() });
    }

    #[test]
    fn broadcast_observer_without_subscribers_does_not_fail() {
        let observer = BroadcastObserver::new(0);
        observer.on_event(&SessionEvent::LoggedOut);
    }
}
