//! Mock collaborators for exercising the login flow without a network.
//!
//! - [`MockTokenEndpoint`]: scripted exchange/refresh results, call
//!   recording and a gate to hold refreshes in flight
//! - [`MockTransport`]: scripted HTTP responses with request recording
//! - [`FailingStore`]: a key/value store whose operations fail
//! - [`RecordingObserver`]: collects session events

#![allow(clippy::missing_errors_doc)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::watch;

use crate::auth::traits::{SessionEvent, SessionObserver, TokenEndpointClient};
use crate::auth::types::TokenSet;
use crate::error::{HttpError, StorageError, TokenError};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::storage::KeyValueStore;

type TokenResult = Result<TokenSet, TokenError>;

/// Arguments of one `exchange_code` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeCall {
    pub code: String,
    pub code_verifier: String,
    pub nonce: String,
}

/// Token endpoint returning scripted results.
///
/// Unscripted exchanges fail with `InvalidResponse`. Unscripted refreshes
/// succeed with access token `refreshed-<n>`, keeping everything else.
#[derive(Debug)]
pub struct MockTokenEndpoint {
    exchanges: Mutex<VecDeque<TokenResult>>,
    refreshes: Mutex<VecDeque<TokenResult>>,
    exchange_calls: Mutex<Vec<ExchangeCall>>,
    refresh_calls: Mutex<Vec<TokenSet>>,
    refresh_count: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl MockTokenEndpoint {
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            exchanges: Mutex::new(VecDeque::new()),
            refreshes: Mutex::new(VecDeque::new()),
            exchange_calls: Mutex::new(Vec::new()),
            refresh_calls: Mutex::new(Vec::new()),
            refresh_count: AtomicUsize::new(0),
            gate,
        }
    }

    /// Queue the result of the next unscripted exchange.
    pub fn push_exchange(&self, result: TokenResult) {
        self.exchanges.lock().push_back(result);
    }

    /// Queue the result of the next unscripted refresh.
    pub fn push_refresh(&self, result: TokenResult) {
        self.refreshes.lock().push_back(result);
    }

    /// Make refreshes block after being counted until [`release_refreshes`].
    ///
    /// [`release_refreshes`]: Self::release_refreshes
    pub fn hold_refreshes(&self) {
        self.gate.send_replace(false);
    }

    /// Let held and future refreshes complete.
    pub fn release_refreshes(&self) {
        self.gate.send_replace(true);
    }

    #[must_use]
    pub fn exchange_calls(&self) -> Vec<ExchangeCall> {
        self.exchange_calls.lock().clone()
    }

    /// Token sets passed to `refresh`, in call order.
    #[must_use]
    pub fn refresh_calls(&self) -> Vec<TokenSet> {
        self.refresh_calls.lock().clone()
    }

    /// Number of `refresh` calls started, including held ones.
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refresh_count.load(Ordering::SeqCst)
    }
}

impl Default for MockTokenEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenEndpointClient for MockTokenEndpoint {
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        nonce: &str,
    ) -> Result<TokenSet, TokenError> {
        self.exchange_calls.lock().push(ExchangeCall {
            code: code.to_string(),
            code_verifier: code_verifier.to_string(),
            nonce: nonce.to_string(),
        });

        self.exchanges.lock().pop_front().unwrap_or_else(|| {
            Err(TokenError::InvalidResponse("no scripted exchange".to_string()))
        })
    }

    async fn refresh(&self, current: &TokenSet) -> Result<TokenSet, TokenError> {
        let n = self.refresh_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_calls.lock().push(current.clone());

        let mut gate = self.gate.subscribe();
        // The sender lives as long as self
        let _ = gate.wait_for(|open| *open).await;

        let scripted = self.refreshes.lock().pop_front();
        scripted.unwrap_or_else(|| {
            current.refresh_token.as_ref().ok_or(TokenError::NoRefreshToken)?;
            let mut tokens = current.clone();
            tokens.access_token = format!("refreshed-{n}");
            Ok(tokens)
        })
    }
}

type Responder = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, HttpError> + Send + Sync>;

/// HTTP transport answering from a queue, then from a responder function.
pub struct MockTransport {
    queue: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    responder: Responder,
    requests: Mutex<Vec<HttpRequest>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").field("requests", &self.requests.lock().len()).finish()
    }
}

impl MockTransport {
    /// Answers every request with `200 OK` and an empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(HttpResponse::new(StatusCode::OK, Vec::new())))
    }

    /// Answers with `responder` once the queue is empty.
    #[must_use]
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, HttpError> + Send + Sync + 'static,
    {
        Self {
            queue: Mutex::new(VecDeque::new()),
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `200 ok` for requests bearing one of `tokens`, `401` otherwise.
    #[must_use]
    pub fn accepting_tokens(tokens: &[&str]) -> Self {
        let accepted: Vec<String> = tokens.iter().map(|t| (*t).to_string()).collect();
        Self::with_responder(move |request| {
            let authorized =
                request.bearer_token().is_some_and(|t| accepted.iter().any(|a| a == t));
            let status = if authorized { StatusCode::OK } else { StatusCode::UNAUTHORIZED };
            Ok(HttpResponse::new(status, if authorized { "ok" } else { "unauthorized" }))
        })
    }

    /// Queue one response ahead of the responder.
    pub fn push_response(&self, response: Result<HttpResponse, HttpError>) {
        self.queue.lock().push_back(response);
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Bearer tokens of the requests received so far.
    #[must_use]
    pub fn bearer_tokens(&self) -> Vec<Option<String>> {
        self.requests.lock().iter().map(|r| r.bearer_token().map(str::to_string)).collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.requests.lock().push(request.clone());
        let queued = self.queue.lock().pop_front();
        queued.unwrap_or_else(|| (self.responder)(&request))
    }
}

/// Key/value store whose selected operations fail.
#[derive(Debug)]
pub struct FailingStore {
    message: String,
    fail_reads: bool,
    fail_writes: bool,
    calls: AtomicUsize,
}

impl FailingStore {
    /// Every operation fails with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), fail_reads: true, fail_writes: true, calls: AtomicUsize::new(0) }
    }

    /// Reads succeed with nothing stored; writes fail.
    #[must_use]
    pub fn failing_writes(message: impl Into<String>) -> Self {
        Self { fail_reads: false, ..Self::new(message) }
    }

    /// Number of operations attempted.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn outcome(&self, fails: bool) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if fails {
            Err(StorageError::unexpected(&self.message))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        self.outcome(self.fail_reads).map(|()| None)
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        self.outcome(self.fail_writes)
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        self.outcome(self.fail_writes)
    }
}

/// Observer keeping every event it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, event: &SessionEvent) {
        self.events.lock().push(event.clone());
    }
}
