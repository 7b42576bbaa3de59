//! Authentication module
//!
//! Implements the OAuth 2.0 authorization code flow with PKCE and the
//! lifecycle of the resulting session.
//!
//! ## Components
//!
//! - **Types** (`types`): pending [`AuthState`], [`TokenSet`], ID-token claims
//! - **PKCE** (`pkce`): verifier/challenge, state and nonce generation
//! - **Client** (`client`): authorization URL and token endpoint calls
//! - **Redirect** (`redirect`): validation of the captured redirect
//! - **Single flight** (`single_flight`): one shared refresh per cohort
//! - **Session** (`session`): bearer requests with refresh-and-retry
//! - **Service** (`service`): login, redirect handling and resume
//!
//! ## Login Flow
//!
//! 1. [`AuthService::login_url`] stores a fresh [`AuthState`]
//! 2. The user authenticates in a browser
//! 3. The redirect query goes to [`AuthService::handle_authentication_response`]
//! 4. State is checked, the code exchanged, the session stored
//! 5. [`AuthenticatedSession::execute`] sends requests, refreshing on 401

pub mod client;
pub mod pkce;
pub mod query;
pub mod redirect;
pub mod service;
pub mod session;
pub mod single_flight;
pub mod traits;
pub mod types;

pub use client::OAuthClient;
pub use redirect::RedirectValidator;
pub use service::AuthService;
pub use session::{
    AccessTokenAuthenticator, AuthenticatedSession, BearerInterceptor, SessionContext, UserSession,
};
pub use single_flight::SingleFlight;
pub use traits::{
    BroadcastObserver, PendingStateStore, SessionEvent, SessionObserver, SessionStore,
    TokenEndpointClient,
};
pub use types::{AuthState, IdTokenClaims, MfaType, OAuthError, StoredSession, TokenSet};
