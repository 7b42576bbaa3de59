//! Shared setup for the session integration tests.

#![allow(dead_code, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use loginflow_session::auth::PendingStateStore;
use loginflow_session::testing::{fixtures, MockTokenEndpoint, MockTransport, RecordingObserver};
use loginflow_session::{
    AuthService, AuthState, AuthenticatedSession, KeyValueStore, MemoryStore, SessionStorage,
    StateStorage,
};

/// An [`AuthService`] wired to in-memory collaborators that tests can
/// inspect.
pub struct Fixture {
    pub endpoint: Arc<MockTokenEndpoint>,
    pub transport: Arc<MockTransport>,
    pub store: Arc<MemoryStore>,
    pub observer: Arc<RecordingObserver>,
    pub service: AuthService,
}

impl Fixture {
    /// Transport answering `200` for every request.
    pub fn new() -> Self {
        Self::with_transport(MockTransport::new())
    }

    pub fn with_transport(transport: MockTransport) -> Self {
        let endpoint = Arc::new(MockTokenEndpoint::new());
        let transport = Arc::new(transport);
        let store = Arc::new(MemoryStore::new());
        let observer = Arc::new(RecordingObserver::new());
        let service = service_over(store.clone(), endpoint.clone(), transport.clone())
            .with_observer(observer.clone());

        Self { endpoint, transport, store, observer, service }
    }

    /// Waiters on another caller's refresh give up after `timeout`.
    pub fn with_refresh_wait_timeout(transport: MockTransport, timeout: Duration) -> Self {
        let Self { endpoint, transport, store, observer, service } = Self::with_transport(transport);
        let service = service.with_refresh_wait_timeout(timeout);
        Self { endpoint, transport, store, observer, service }
    }

    /// A second service over the same store, as after an app restart.
    pub fn restarted(&self) -> AuthService {
        service_over(self.store.clone(), self.endpoint.clone(), self.transport.clone())
    }

    /// Log in through the redirect path with `at-1`/`rt-1`.
    pub async fn logged_in(&self) -> AuthenticatedSession {
        StateStorage::new(self.store.clone())
            .save_state(&AuthState::new("s1", "n1", "v1", None))
            .await
            .expect("pending state should be stored");
        self.endpoint.push_exchange(Ok(fixtures::token_set("at-1", Some("rt-1"))));

        self.service
            .handle_authentication_response(Some("code=abc&state=s1"))
            .await
            .expect("login should succeed")
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

fn service_over(
    store: Arc<dyn KeyValueStore>,
    endpoint: Arc<MockTokenEndpoint>,
    transport: Arc<MockTransport>,
) -> AuthService {
    AuthService::new(
        fixtures::client_config("https://login.example.com"),
        endpoint,
        Arc::new(StateStorage::new(store.clone())),
        Arc::new(SessionStorage::new(store)),
        transport,
    )
}

/// `GET` against the resource server used in these tests.
pub fn api_request(path: &str) -> loginflow_session::HttpRequest {
    let url = url::Url::parse("https://api.example.com/")
        .and_then(|base| base.join(path))
        .expect("test URL should parse");
    loginflow_session::HttpRequest::get(url)
}
