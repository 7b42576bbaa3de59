//! Login orchestration
//!
//! [`AuthService`] ties the collaborators together for one OAuth client:
//!
//! 1. [`login_url`](AuthService::login_url) creates and stores the pending
//!    [`AuthState`] and returns the URL to open in a browser
//! 2. [`handle_authentication_response`](AuthService::handle_authentication_response)
//!    consumes the pending state, validates the redirect, persists the new
//!    session and returns it
//! 3. [`resume_last_logged_in_user`](AuthService::resume_last_logged_in_user)
//!    rebuilds the session from storage on the next start, without network

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use super::client::{authorization_url, OAuthClient};
use super::redirect::RedirectValidator;
use super::session::{AuthenticatedSession, SessionContext, UserSession};
use super::traits::{PendingStateStore, SessionEvent, SessionObserver, SessionStore, TokenEndpointClient};
use super::types::{AuthState, MfaType, StoredSession};
use crate::config::{ClientConfig, Config};
use crate::error::{HttpError, LoginError, StorageError};
use crate::http::{HttpTransport, ReqwestTransport};

/// Login flow for one OAuth client.
pub struct AuthService {
    context: SessionContext,
    state_store: Arc<dyn PendingStateStore>,
    validator: RedirectValidator,
    initialized: AtomicBool,
}

impl AuthService {
    /// Create a service from its collaborators.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        token_client: Arc<dyn TokenEndpointClient>,
        state_store: Arc<dyn PendingStateStore>,
        session_store: Arc<dyn SessionStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self::from_context(
            SessionContext::new(config, token_client, session_store, transport),
            state_store,
        )
    }

    /// Create a service talking to the configured server over reqwest.
    ///
    /// # Errors
    /// Fails if the HTTP client cannot be built.
    pub fn from_config(
        config: &Config,
        state_store: Arc<dyn PendingStateStore>,
        session_store: Arc<dyn SessionStore>,
    ) -> Result<Self, HttpError> {
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::from_config(&config.session)?);
        let token_client = OAuthClient::new(config.client.clone(), Arc::clone(&transport));

        Ok(Self::new(
            config.client.clone(),
            Arc::new(token_client),
            state_store,
            session_store,
            transport,
        )
        .with_refresh_wait_timeout(config.session.refresh_wait_timeout()))
    }

    /// Create a service sharing an existing session context.
    #[must_use]
    pub fn from_context(context: SessionContext, state_store: Arc<dyn PendingStateStore>) -> Self {
        let validator = RedirectValidator::new(Arc::clone(&context.token_client));
        Self { context, state_store, validator, initialized: AtomicBool::new(false) }
    }

    /// Send login/logout events of every session created here to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.context = self.context.with_observer(observer);
        self
    }

    /// Bound how long a request waits on another caller's token refresh.
    #[must_use]
    pub fn with_refresh_wait_timeout(mut self, timeout: Duration) -> Self {
        self.context = self.context.with_refresh_wait_timeout(timeout);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.context.config
    }

    /// Whether a login completed or a resume attempt finished.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Start a login.
    ///
    /// Stores a fresh [`AuthState`], replacing any login still pending, and
    /// returns the authorization URL to open.
    ///
    /// # Errors
    /// Returns the store's error if the pending state could not be saved.
    pub async fn login_url(
        &self,
        extra_data: Option<BTreeMap<String, String>>,
        mfa: Option<MfaType>,
    ) -> Result<Url, StorageError> {
        let state = AuthState::generate(extra_data);
        self.state_store.save_state(&state).await?;

        debug!(client_id = %self.context.config.client_id, ?mfa, "Login started");
        Ok(authorization_url(&self.context.config, &state, mfa))
    }

    /// Complete a login from the captured redirect query.
    ///
    /// The pending state is consumed whatever the outcome. An absent or empty
    /// response fails before any storage access.
    ///
    /// # Errors
    /// - `AuthorizationError` if the redirect carries an `error`
    /// - `TokenErrorResponse` if the endpoint rejected the code
    /// - `UnexpectedError` for a missing response, a state mismatch or any
    ///   other failure
    pub async fn handle_authentication_response(
        &self,
        query: Option<&str>,
    ) -> Result<AuthenticatedSession, LoginError> {
        let params = RedirectValidator::parse_response(query)?;

        let loaded = self.state_store.load_state().await;
        if let Err(e) = self.state_store.clear_state().await {
            warn!(error = %e, "Failed to clear pending login state");
        }
        let pending = loaded
            .map_err(|e| LoginError::unexpected(format!("Failed to read login state: {e}")))?;

        let tokens = self.validator.validate_params(&params, pending.as_ref()).await?;

        let stored = StoredSession::new(self.context.config.client_id.clone(), tokens.clone());
        if let Err(e) = self.context.session_store.save_session(&stored).await {
            warn!(error = %e, "Failed to persist new session");
        }

        let session = AuthenticatedSession::new(self.context.clone(), tokens);
        let uuid = session.uuid().unwrap_or_default();
        info!(%uuid, "User logged in");

        self.initialized.store(true, Ordering::SeqCst);
        self.context.notify(&SessionEvent::LoggedIn { uuid });
        Ok(session)
    }

    /// Rebuild the last logged-in user's session from storage.
    ///
    /// No network call is made: stale tokens are discovered on the first
    /// request and refreshed then.
    ///
    /// # Errors
    /// Returns the store's error unchanged.
    pub async fn resume_last_logged_in_user(
        &self,
    ) -> Result<Option<AuthenticatedSession>, StorageError> {
        let client_id = &self.context.config.client_id;
        let stored = self.context.session_store.load_session(client_id).await?;
        self.initialized.store(true, Ordering::SeqCst);

        let Some(stored) = stored else {
            debug!(%client_id, "No stored session");
            return Ok(None);
        };

        if stored.client_id != *client_id {
            warn!(%client_id, stored = %stored.client_id, "Stored session belongs to another client");
            return Ok(None);
        }

        info!(sub = %stored.tokens.id_token_claims.sub, "Resumed stored session");
        Ok(Some(AuthenticatedSession::new(self.context.clone(), stored.tokens)))
    }

    /// Live session for a snapshot taken with
    /// [`AuthenticatedSession::session`].
    #[must_use]
    pub fn session_from(&self, session: UserSession) -> AuthenticatedSession {
        AuthenticatedSession::new(self.context.clone(), session.tokens)
    }
}

impl fmt::Debug for AuthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthService")
            .field("context", &self.context)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
