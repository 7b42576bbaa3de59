//! End-to-end login tests against a mock authorization server.
//!
//! **Coverage:**
//! - Login URL → redirect → code exchange → persisted session
//! - Authenticated request with 401 → refresh → retry over real HTTP
//! - Error redirect and rejected code never yield a session
//! - Resume after restart and logout

#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;

use loginflow_session::auth::{BroadcastObserver, PendingStateStore, SessionStore};
use loginflow_session::testing::fixtures;
use loginflow_session::{
    AuthService, ClientConfig, LoginError, MemoryStore, OAuthClient, OAuthError, ReqwestTransport,
    SessionEvent, SessionStorage, StateStorage,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Server {
    mock: MockServer,
    config: ClientConfig,
    store: Arc<MemoryStore>,
    observer: Arc<BroadcastObserver>,
}

impl Server {
    async fn start() -> Self {
        let mock = MockServer::start().await;
        let config = fixtures::client_config(&mock.uri());
        Self {
            mock,
            config,
            store: Arc::new(MemoryStore::new()),
            observer: Arc::new(BroadcastObserver::default()),
        }
    }

    fn service(&self) -> AuthService {
        let transport = Arc::new(ReqwestTransport::new().expect("transport should build"));
        let client = OAuthClient::new(self.config.clone(), transport.clone());
        AuthService::new(
            self.config.clone(),
            Arc::new(client),
            Arc::new(StateStorage::new(self.store.clone())),
            Arc::new(SessionStorage::new(self.store.clone())),
            transport,
        )
        .with_observer(self.observer.clone())
    }

    /// Start a login and mount a token endpoint answering the exchange
    /// with tokens bound to its nonce. Returns the redirect query.
    async fn begin_login(&self, service: &AuthService) -> String {
        let url = service.login_url(None, None).await.expect("login should start");
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let pending = StateStorage::new(self.store.clone())
            .load_state()
            .await
            .expect("state should load")
            .expect("login should leave a pending state");
        assert_eq!(params["state"], pending.state);

        let claims = fixtures::id_token_claims(fixtures::TEST_UUID, fixtures::TEST_USER_ID, Some(&pending.nonce));
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains(format!("code_verifier={}", pending.pkce_verifier)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "id_token": fixtures::encode_id_token(&claims),
                "scope": "openid offline_access",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&self.mock)
            .await;

        format!("?code=abc&state={}", pending.state)
    }
}

#[tokio::test]
async fn login_persists_session_and_serves_requests() {
    let server = Server::start().await;
    let service = server.service();
    let mut events = server.observer.subscribe();

    Mock::given(method("GET"))
        .and(path(format!("/api/2/user/{}", fixtures::TEST_USER_ID)))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "uuid": fixtures::TEST_UUID, "email": "user@example.com" }
        })))
        .expect(1)
        .mount(&server.mock)
        .await;

    let redirect = server.begin_login(&service).await;
    let session = service.handle_authentication_response(Some(&redirect)).await.unwrap();

    assert_eq!(session.to_string(), format!("User(uuid={})", fixtures::TEST_UUID));
    assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedIn { uuid: fixtures::TEST_UUID.into() });

    let profile = session.fetch_profile_data().await.unwrap();
    assert_eq!(profile.email.as_deref(), Some("user@example.com"));

    let stored = SessionStorage::new(server.store.clone())
        .load_session(fixtures::TEST_CLIENT_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.tokens.access_token, "at-1");
    assert_eq!(StateStorage::new(server.store.clone()).load_state().await.unwrap(), None);
}

#[tokio::test]
async fn expired_access_token_is_refreshed_over_http() {
    let server = Server::start().await;
    let service = server.service();
    let redirect = server.begin_login(&service).await;
    let session = service.handle_authentication_response(Some(&redirect)).await.unwrap();

    Mock::given(method("GET"))
        .and(path("/api/2/user/12345"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server.mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2/user/12345"))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
        .expect(1)
        .mount(&server.mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "access_token": "at-2", "expires_in": 3600 })),
        )
        .expect(1)
        .mount(&server.mock)
        .await;

    session.fetch_profile_data().await.unwrap();

    let tokens = session.tokens().unwrap();
    assert_eq!(tokens.access_token, "at-2");
    assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(tokens.id_token_claims.sub, fixtures::TEST_UUID);

    let stored = SessionStorage::new(server.store.clone())
        .load_session(fixtures::TEST_CLIENT_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.tokens, tokens);
}

#[tokio::test]
async fn error_redirect_never_reaches_token_endpoint() {
    let server = Server::start().await;
    let service = server.service();
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server.mock)
        .await;

    service.login_url(None, None).await.unwrap();
    let state = StateStorage::new(server.store.clone()).load_state().await.unwrap().unwrap().state;
    let redirect = format!("error=access_denied&error_description=User+cancelled&state={state}");

    let err = service.handle_authentication_response(Some(&redirect)).await.unwrap_err();

    assert_eq!(
        err,
        LoginError::AuthorizationError {
            error: "access_denied".into(),
            description: Some("User cancelled".into()),
        }
    );
}

#[tokio::test]
async fn rejected_code_surfaces_oauth_error() {
    let server = Server::start().await;
    let service = server.service();
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Code expired"
        })))
        .expect(1)
        .mount(&server.mock)
        .await;

    service.login_url(None, None).await.unwrap();
    let state = StateStorage::new(server.store.clone()).load_state().await.unwrap().unwrap().state;

    let err = service
        .handle_authentication_response(Some(&format!("code=abc&state={state}")))
        .await
        .unwrap_err();

    assert_eq!(err, LoginError::TokenErrorResponse(OAuthError::new("invalid_grant", Some("Code expired"))));
    assert!(server.store.is_empty());
}

#[tokio::test]
async fn resume_and_logout_across_restart() {
    let server = Server::start().await;
    let first = server.service();
    let redirect = server.begin_login(&first).await;
    let session = first.handle_authentication_response(Some(&redirect)).await.unwrap();

    let restarted = server.service();
    let resumed = restarted.resume_last_logged_in_user().await.unwrap().unwrap();
    assert_eq!(resumed, session);
    assert!(restarted.is_initialized());

    let mut events = server.observer.subscribe();
    resumed.logout().await.unwrap();
    assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedOut);
    assert_eq!(resumed.to_string(), "User(logged-out)");

    let after_logout = server.service();
    assert!(after_logout.resume_last_logged_in_user().await.unwrap().is_none());
}
