//! The authenticated session of a logged-in user.
//!
//! An [`AuthenticatedSession`] owns the user's live [`TokenSet`] and moves
//! between two states:
//!
//! ```text
//!   LoggedIn(tokens) ──refresh──► LoggedIn(tokens')
//!          │
//!        logout
//!          ▼
//!      LoggedOut  (terminal: every authenticated operation fails fast)
//! ```
//!
//! Requests go through a two-hook pipeline: [`BearerInterceptor`] attaches
//! the current access token, and on a 401 [`AccessTokenAuthenticator`]
//! refreshes the tokens (once per cohort of concurrent callers, via
//! [`SingleFlight`]) and hands back the request to retry. A request is retried
//! at most once.
//!
//! Refresh commits and logout are serialized on one async lock, so a refresh
//! finishing after logout discards its tokens instead of resurrecting the
//! session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::single_flight::SingleFlight;
use super::traits::{SessionEvent, SessionObserver, SessionStore, TokenEndpointClient};
use super::types::{StoredSession, TokenSet};
use crate::config::ClientConfig;
use crate::error::{RefreshTokenError, RequestError, SessionError, StorageError};
use crate::http::{Authenticator, HttpRequest, HttpResponse, HttpTransport, RequestInterceptor};

/// Access tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 30;

/// Serializable snapshot of a session's tokens.
///
/// Hand it to [`AuthService::session_from`](super::AuthService::session_from)
/// to rebuild a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    pub(crate) tokens: TokenSet,
}

impl UserSession {
    #[must_use]
    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }
}

/// Collaborators shared by every session of one client.
#[derive(Clone)]
pub struct SessionContext {
    pub config: ClientConfig,
    pub token_client: Arc<dyn TokenEndpointClient>,
    pub session_store: Arc<dyn SessionStore>,
    pub transport: Arc<dyn HttpTransport>,
    pub observer: Option<Arc<dyn SessionObserver>>,
    /// How long a caller joining a running refresh waits for its result
    pub refresh_wait_timeout: Option<Duration>,
}

impl SessionContext {
    #[must_use]
    pub fn new(
        config: ClientConfig,
        token_client: Arc<dyn TokenEndpointClient>,
        session_store: Arc<dyn SessionStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            token_client,
            session_store,
            transport,
            observer: None,
            refresh_wait_timeout: None,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn with_refresh_wait_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_wait_timeout = Some(timeout);
        self
    }

    pub(crate) fn notify(&self, event: &SessionEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(event);
        }
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .field("refresh_wait_timeout", &self.refresh_wait_timeout)
            .finish_non_exhaustive()
    }
}

type RefreshResult = Result<TokenSet, RefreshTokenError>;

struct SessionInner {
    context: SessionContext,
    tokens: RwLock<Option<TokenSet>>,
    commit_lock: tokio::sync::Mutex<()>,
    refresher: SingleFlight<RefreshResult>,
}

/// A logged-in user. Clones share the same state.
#[derive(Clone)]
pub struct AuthenticatedSession {
    inner: Arc<SessionInner>,
}

impl AuthenticatedSession {
    /// Wrap `tokens`; no network call is made.
    #[must_use]
    pub fn new(context: SessionContext, tokens: TokenSet) -> Self {
        let refresher = match context.refresh_wait_timeout {
            Some(timeout) => SingleFlight::with_wait_timeout(timeout),
            None => SingleFlight::new(),
        };

        Self {
            inner: Arc::new(SessionInner {
                context,
                tokens: RwLock::new(Some(tokens)),
                commit_lock: tokio::sync::Mutex::new(()),
                refresher,
            }),
        }
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.inner.tokens.read().is_some()
    }

    /// Snapshot of the current tokens.
    pub fn tokens(&self) -> Result<TokenSet, SessionError> {
        self.inner.tokens.read().clone().ok_or(SessionError::NotLoggedIn)
    }

    /// Numeric user id, as a string.
    pub fn user_id(&self) -> Result<String, SessionError> {
        self.with_tokens(|tokens| tokens.id_token_claims.user_id.clone())
    }

    /// User UUID (the ID token subject).
    pub fn uuid(&self) -> Result<String, SessionError> {
        self.with_tokens(|tokens| tokens.id_token_claims.sub.clone())
    }

    /// Serializable snapshot of this session.
    pub fn session(&self) -> Result<UserSession, SessionError> {
        self.tokens().map(|tokens| UserSession { tokens })
    }

    /// Client registration the session belongs to.
    #[must_use]
    pub fn client_config(&self) -> &ClientConfig {
        &self.inner.context.config
    }

    pub(crate) fn context(&self) -> &SessionContext {
        &self.inner.context
    }

    fn with_tokens<T>(&self, f: impl FnOnce(&TokenSet) -> T) -> Result<T, SessionError> {
        self.inner.tokens.read().as_ref().map(f).ok_or(SessionError::NotLoggedIn)
    }

    /// Log the user out.
    ///
    /// Clears the in-memory tokens, deletes the stored session and emits
    /// [`SessionEvent::LoggedOut`]. A refresh still running when this is
    /// called has its result discarded. Logging out a logged-out session does
    /// nothing.
    ///
    /// # Errors
    /// Returns the store's error if the stored session could not be deleted.
    /// The session is logged out regardless.
    pub async fn logout(&self) -> Result<(), StorageError> {
        let _commit = self.inner.commit_lock.lock().await;

        let previous = self.inner.tokens.write().take();
        let Some(previous) = previous else {
            return Ok(());
        };

        info!(sub = %previous.id_token_claims.sub, "Logging out");
        let context = &self.inner.context;
        let deleted = context.session_store.delete_session(&context.config.client_id).await;
        if let Err(e) = &deleted {
            warn!(error = %e, "Failed to delete stored session on logout");
        }

        context.notify(&SessionEvent::LoggedOut);
        deleted
    }

    /// Refresh the tokens, joining a refresh that is already running.
    ///
    /// On success the new tokens are live and persisted before this returns.
    ///
    /// # Errors
    /// - `RefreshTokenInvalid`: the refresh token was rejected; log out
    /// - `RefreshRequestFailed`: transient endpoint or network failure
    /// - `ConcurrentRefreshFailure`: joined a refresh that never reported
    /// - `LoggedOut`: the session was logged out before or during the refresh
    pub async fn refresh_tokens(&self) -> Result<TokenSet, RefreshTokenError> {
        self.inner
            .refresher
            .run(|| self.refresh_and_commit())
            .await
            .unwrap_or(Err(RefreshTokenError::ConcurrentRefreshFailure))
    }

    /// Refresh ahead of a request when the access token is near expiry.
    ///
    /// Transient failures are left to the 401 path. A rejected refresh token
    /// is returned since the request cannot succeed.
    async fn refresh_if_expiring(&self) -> Result<(), RequestError> {
        let current = self.tokens()?;
        if current.refresh_token.is_none() || !current.is_expired(EXPIRY_MARGIN_SECS) {
            return Ok(());
        }

        debug!(
            seconds_until_expiry = ?current.seconds_until_expiry(),
            "Access token near expiry, refreshing before request"
        );
        match self.refresh_tokens().await {
            Ok(_) => Ok(()),
            Err(e) if e.requires_logout() => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "Early token refresh failed, sending with current token");
                Ok(())
            }
        }
    }

    async fn refresh_and_commit(&self) -> RefreshResult {
        let current = self.tokens().map_err(|_| RefreshTokenError::LoggedOut)?;

        debug!(sub = %current.id_token_claims.sub, "Refreshing access token");
        let refreshed = self
            .inner
            .context
            .token_client
            .refresh(&current)
            .await
            .map_err(RefreshTokenError::from)
            .inspect_err(|e| warn!(error = %e, "Token refresh failed"))?;

        self.commit(refreshed).await
    }

    async fn commit(&self, tokens: TokenSet) -> RefreshResult {
        let _commit = self.inner.commit_lock.lock().await;

        {
            let mut slot = self.inner.tokens.write();
            if slot.is_none() {
                info!("Session logged out during refresh; discarding new tokens");
                return Err(RefreshTokenError::LoggedOut);
            }
            *slot = Some(tokens.clone());
        }

        let stored = StoredSession::new(self.inner.context.config.client_id.clone(), tokens.clone());
        if let Err(e) = self.inner.context.session_store.save_session(&stored).await {
            warn!(error = %e, "Failed to persist refreshed session");
        }

        Ok(tokens)
    }

    /// Pre-request hook attaching this session's access token.
    #[must_use]
    pub fn interceptor(&self) -> BearerInterceptor {
        BearerInterceptor { session: self.clone() }
    }

    /// 401 hook refreshing this session's tokens.
    #[must_use]
    pub fn authenticator(&self) -> AccessTokenAuthenticator {
        AccessTokenAuthenticator { session: self.clone() }
    }

    /// Perform `request` with the user's access token.
    ///
    /// An access token about to expire is refreshed before sending. A 401
    /// triggers one refresh and one retry with the new token. Any other
    /// status is returned as is.
    ///
    /// # Errors
    /// - `NotLoggedIn` if the session is logged out
    /// - `Refresh` if the 401 could not be cured by a refresh, or the
    ///   refresh token was rejected before sending
    /// - `Unauthorized` if the retried request got a 401 as well
    /// - `Transport` if either attempt failed to produce a response
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
        let transport = &self.inner.context.transport;
        self.refresh_if_expiring().await?;

        let outgoing = self.interceptor().intercept(request)?;
        let response = transport.send(outgoing.clone()).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        debug!(url = %outgoing.url.as_str(), "Request unauthorized, re-authenticating");
        let Some(retry) = self.authenticator().authenticate(&outgoing, &response).await? else {
            return Ok(response);
        };

        let response = transport.send(retry).await?;
        if response.is_unauthorized() {
            warn!(url = %outgoing.url.as_str(), "Request still unauthorized after token refresh");
            return Err(RequestError::Unauthorized(Box::new(response)));
        }
        Ok(response)
    }
}

impl fmt::Display for AuthenticatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.uuid() {
            Ok(uuid) => write!(f, "User(uuid={uuid})"),
            Err(_) => write!(f, "User(logged-out)"),
        }
    }
}

impl fmt::Debug for AuthenticatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedSession")
            .field("client_id", &self.inner.context.config.client_id)
            .field("logged_in", &self.is_logged_in())
            .finish_non_exhaustive()
    }
}

/// Sessions are equal when they hold equal tokens.
impl PartialEq for AuthenticatedSession {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        let mine = self.inner.tokens.read().clone();
        let theirs = other.inner.tokens.read().clone();
        mine == theirs
    }
}

/// Attaches `Authorization: Bearer <access token>`.
#[derive(Debug, Clone)]
pub struct BearerInterceptor {
    session: AuthenticatedSession,
}

impl RequestInterceptor for BearerInterceptor {
    fn intercept(&self, request: HttpRequest) -> Result<HttpRequest, RequestError> {
        let access_token = self.session.with_tokens(|tokens| tokens.access_token.clone())?;
        Ok(request.with_bearer(&access_token)?)
    }
}

/// Answers a 401 with the request to retry.
///
/// If the rejected token is no longer the session's current one, another
/// caller already refreshed and the request is retried with the current token
/// directly. Otherwise the tokens are refreshed first. Requests that carried
/// no bearer token are not ours and pass through.
#[derive(Debug, Clone)]
pub struct AccessTokenAuthenticator {
    session: AuthenticatedSession,
}

#[async_trait]
impl Authenticator for AccessTokenAuthenticator {
    async fn authenticate(
        &self,
        request: &HttpRequest,
        _response: &HttpResponse,
    ) -> Result<Option<HttpRequest>, RequestError> {
        let Some(rejected) = request.bearer_token() else {
            return Ok(None);
        };

        let current = self.session.tokens()?;
        if rejected != current.access_token {
            debug!("Rejected token already replaced, retrying with current token");
            return Ok(Some(request.clone().with_bearer(&current.access_token)?));
        }

        let refreshed = self.session.refresh_tokens().await?;
        Ok(Some(request.clone().with_bearer(&refreshed.access_token)?))
    }
}
