//! HTTP transport abstraction.
//!
//! The session never talks to reqwest directly. Requests and responses are
//! plain buffered values so a request can be re-issued after a token refresh,
//! and the transport is a trait so tests can script responses. The two hook
//! traits, [`RequestInterceptor`] and [`Authenticator`], are the strategy
//! objects an authenticated session plugs into the request pipeline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client as ReqwestClient, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::auth::query::query_encode;
use crate::config::SessionConfig;
use crate::error::{HttpError, RequestError};

const BEARER_PREFIX: &str = "Bearer ";

/// A fully buffered outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Request without headers or body.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: HeaderMap::new(), body: None }
    }

    /// `GET url`
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// `POST url` with an `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn post_form<'a, I>(url: Url, params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut request = Self::new(Method::POST, url);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded"));
        request.body = Some(query_encode(params).into_bytes());
        request
    }

    /// Set a header, replacing any previous value.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self, HttpError> {
        let value =
            HeaderValue::from_str(value).map_err(|e| HttpError::InvalidHeader(e.to_string()))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Set `Authorization: Bearer <token>`, replacing any previous value.
    pub fn with_bearer(self, token: &str) -> Result<Self, HttpError> {
        self.with_header(AUTHORIZATION, &format!("{BEARER_PREFIX}{token}"))
    }

    /// Bearer token currently attached, if any.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers.get(AUTHORIZATION)?.to_str().ok()?.strip_prefix(BEARER_PREFIX)
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Response with the given status and body and no headers.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into() }
    }

    /// 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// 401, the only status that triggers refresh-and-retry.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Issues a request and produces a response or a transport error.
///
/// Non-2xx statuses are responses, not errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Pre-request hook: rewrites a request before it is sent.
pub trait RequestInterceptor: Send + Sync {
    /// Return the request to send.
    fn intercept(&self, request: HttpRequest) -> Result<HttpRequest, RequestError>;
}

/// Response hook run when a request is answered with 401.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Produce the request to retry, or `None` to hand the 401 back to the
    /// caller untouched.
    async fn authenticate(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<Option<HttpRequest>, RequestError>;
}

/// [`HttpTransport`] backed by a reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    /// Start building a transport.
    #[must_use]
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Transport with default settings.
    pub fn new() -> Result<Self, HttpError> {
        Self::builder().build()
    }

    /// Transport with the timeout and user agent of `config`.
    pub fn from_config(config: &SessionConfig) -> Result<Self, HttpError> {
        let mut builder = Self::builder().timeout(config.http_timeout());
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        builder.build()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let HttpRequest { method, url, headers, body } = request;
        debug!(%method, url = %url.as_str(), "sending HTTP request");

        let mut builder = self.client.request(method.clone(), url.clone()).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|err| {
            debug!(%method, url = %url.as_str(), error = %err, "HTTP request failed");
            HttpError::from(err)
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        debug!(%method, url = %url.as_str(), %status, "received HTTP response");

        Ok(HttpResponse { status, headers, body })
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    timeout: Duration,
    user_agent: Option<String>,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), user_agent: None }
    }
}

impl ReqwestTransportBuilder {
    /// Total request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<ReqwestTransport, HttpError> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout);

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        let client = builder.build().map_err(|e| HttpError::Request(e.to_string()))?;
        Ok(ReqwestTransport { client })
    }
}
