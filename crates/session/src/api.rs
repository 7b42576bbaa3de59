//! Authenticated convenience calls against the account server.
//!
//! All calls go through [`AuthenticatedSession::execute`], so they share its
//! bearer injection and refresh-and-retry behavior.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::{form_urlencoded, Url};

use crate::auth::session::AuthenticatedSession;
use crate::error::{ErrorClassification, ErrorSeverity, RequestError, SessionError};
use crate::http::{HttpRequest, HttpResponse};

/// Failure of a convenience API call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request itself failed: not logged in, transport, refresh or a
    /// second 401
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The server answered with a non-2xx status
    #[error("Unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The body did not have the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ErrorClassification for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_retryable(),
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Decode(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Request(e) => e.severity(),
            Self::Status { status, .. } if status.is_server_error() => ErrorSeverity::Warning,
            Self::Status { .. } | Self::Decode(_) => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_critical())
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS => {
                Some(Duration::from_secs(60))
            }
            _ => None,
        }
    }
}

/// Profile of the logged-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileResponse {
    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub status: Option<i64>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub email_verified: Option<String>,

    #[serde(default)]
    pub phone_number: Option<String>,

    #[serde(default)]
    pub phone_number_verified: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub name: Option<Name>,

    #[serde(default)]
    pub birthday: Option<String>,

    #[serde(default)]
    pub gender: Option<String>,

    #[serde(default)]
    pub locale: Option<String>,

    #[serde(default)]
    pub created: Option<String>,

    #[serde(default)]
    pub updated: Option<String>,

    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Structured name within a profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Name {
    #[serde(default)]
    pub given_name: Option<String>,

    #[serde(default)]
    pub family_name: Option<String>,

    #[serde(default)]
    pub formatted: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionExchangeResponse {
    code: String,
}

impl AuthenticatedSession {
    /// Fetch the profile of this session's user.
    ///
    /// # Errors
    /// Fails if the session is logged out, the request fails or the body is
    /// not a profile.
    pub async fn fetch_profile_data(&self) -> Result<UserProfileResponse, ApiError> {
        let user_id = self.user_id().map_err(RequestError::from)?;
        let url = self.client_config().resolve(&format!("api/2/user/{user_id}"));

        let response = self.execute(HttpRequest::get(url)).await?;
        decode_data(&response)
    }

    /// URL creating a web session for this user at `redirect_uri`.
    ///
    /// Exchanges the session for a one-time code issued to `client_id` and
    /// embeds it in `{server}/session/{code}`.
    ///
    /// # Errors
    /// Fails if the session is logged out, the request fails or no code is
    /// returned.
    pub async fn web_session_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<Url, ApiError> {
        let config = self.client_config();
        let request = HttpRequest::post_form(
            config.resolve("api/2/oauth/exchange"),
            [("type", "session"), ("clientId", client_id), ("redirectUri", redirect_uri)],
        );

        let response = self.execute(request).await?;
        let exchange: SessionExchangeResponse = decode_data(&response)?;
        debug!(%client_id, "Session exchange code issued");

        let code: String = form_urlencoded::byte_serialize(exchange.code.as_bytes()).collect();
        Ok(config.resolve(&format!("session/{code}")))
    }

    /// Account pages of the server this session belongs to.
    ///
    /// # Errors
    /// [`SessionError::NotLoggedIn`] once the session is logged out.
    pub fn account_pages_url(&self) -> Result<Url, SessionError> {
        if !self.is_logged_in() {
            return Err(SessionError::NotLoggedIn);
        }
        Ok(self.client_config().account_pages_url())
    }
}

/// Decode a successful response, unwrapping the `data` envelope when present.
fn decode_data<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    if !response.is_success() {
        return Err(ApiError::Status { status: response.status, body: response.text() });
    }

    let mut value: serde_json::Value =
        response.json().map_err(|e| ApiError::Decode(e.to_string()))?;
    let payload = match value.get_mut("data") {
        Some(data) if data.is_object() => data.take(),
        _ => value,
    };
    serde_json::from_value(payload).map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::session::SessionContext;
    use crate::http::ReqwestTransport;
    use crate::storage::{MemoryStore, SessionStorage};
    use crate::testing::{fixtures, MockTokenEndpoint};

    fn session_for(server: &MockServer) -> AuthenticatedSession {
        let context = SessionContext::new(
            fixtures::client_config(&server.uri()),
            Arc::new(MockTokenEndpoint::new()),
            Arc::new(SessionStorage::new(Arc::new(MemoryStore::new()))),
            Arc::new(ReqwestTransport::new().unwrap()),
        );
        AuthenticatedSession::new(context, fixtures::token_set("at-1", Some("rt-1")))
    }

    #[tokio::test]
    async fn test_fetch_profile_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/api/2/user/{}", fixtures::TEST_USER_ID)))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "SPP Container",
                "data": {
                    "uuid": fixtures::TEST_UUID,
                    "userId": fixtures::TEST_USER_ID,
                    "email": "user@example.com",
                    "name": { "givenName": "Ada", "familyName": "Lovelace" },
                    "merchants": [1, 2]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let profile = session_for(&server).fetch_profile_data().await.unwrap();

        assert_eq!(profile.uuid.as_deref(), Some(fixtures::TEST_UUID));
        assert_eq!(profile.email.as_deref(), Some("user@example.com"));
        assert_eq!(profile.name.unwrap().given_name.as_deref(), Some("Ada"));
        assert_eq!(profile.extra["merchants"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_fetch_profile_data_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = session_for(&server).fetch_profile_data().await.unwrap_err();

        assert!(matches!(&err, ApiError::Status { status, .. } if *status == StatusCode::SERVICE_UNAVAILABLE));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_profile_data_logged_out() {
        let server = MockServer::start().await;
        let session = session_for(&server);
        session.logout().await.unwrap();

        let err = session.fetch_profile_data().await.unwrap_err();

        assert!(matches!(err, ApiError::Request(RequestError::NotLoggedIn)));
        assert!(err.is_critical());
    }

    #[tokio::test]
    async fn test_web_session_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/2/oauth/exchange"))
            .and(body_string_contains("type=session"))
            .and(body_string_contains("clientId=web-client"))
            .and(body_string_contains("redirectUri=https%3A%2F%2Fweb.example.com%2Fdone"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "code": "one-time" } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = session_for(&server)
            .web_session_url("web-client", "https://web.example.com/done")
            .await
            .unwrap();

        assert_eq!(url.as_str(), format!("{}/session/one-time", server.uri()));
    }

    #[tokio::test]
    async fn test_web_session_url_missing_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
            .mount(&server)
            .await;

        let err = session_for(&server).web_session_url("web-client", "x").await.unwrap_err();

        assert!(matches!(err, ApiError::Decode(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_decode_without_envelope() {
        let response = HttpResponse::new(StatusCode::OK, r#"{"code":"c"}"#);
        let decoded: SessionExchangeResponse = decode_data(&response).unwrap();
        assert_eq!(decoded.code, "c");
    }

    fn offline_session() -> AuthenticatedSession {
        let context = SessionContext::new(
            fixtures::client_config("https://login.example.com"),
            Arc::new(MockTokenEndpoint::new()),
            Arc::new(SessionStorage::new(Arc::new(MemoryStore::new()))),
            Arc::new(crate::testing::MockTransport::new()),
        );
        AuthenticatedSession::new(context, fixtures::token_set("at-1", None))
    }

    #[test]
    fn test_account_pages_url() {
        let session = offline_session();

        assert_eq!(
            session.account_pages_url().unwrap().as_str(),
            "https://login.example.com/account/summary"
        );
    }

    #[tokio::test]
    async fn test_account_pages_url_logged_out() {
        let session = offline_session();
        session.logout().await.unwrap();

        assert_eq!(session.account_pages_url(), Err(SessionError::NotLoggedIn));
    }
}
