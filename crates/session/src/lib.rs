//! Client-side session management for the OAuth 2.0 authorization code +
//! PKCE login flow.
//!
//! The crate authenticates a user through a browser-delegated redirect,
//! exchanges the resulting code for tokens, persists the session and then
//! serves authenticated HTTP requests, refreshing expired access tokens
//! transparently.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   AuthService   │  login URL, redirect handling, resume
//! └────────┬────────┘
//!          │
//!          ├──► RedirectValidator      (state + error checks, code exchange)
//!          ├──► PendingStateStore      (one in-flight AuthState)
//!          ├──► SessionStore           (StoredSession per client id)
//!          │
//!          └──► AuthenticatedSession   (bearer requests, 401 → refresh → retry)
//!                     │
//!                     ├──► SingleFlight      (one refresh per cohort)
//!                     └──► TokenEndpointClient
//! ```
//!
//! # Module Organization
//!
//! - **[`auth`]**: login state, tokens, redirect validation, refresh
//!   coordination and the authenticated session
//! - **[`http`]**: transport abstraction with interceptor/authenticator hooks
//! - **[`storage`]**: key/value store contract and JSON-backed stores
//! - **[`api`]**: authenticated convenience calls (profile, web session)
//! - **[`config`]**: configuration types and loader
//! - **[`error`]**: error taxonomy and classification
//! - **[`telemetry`]**: tracing setup and token redaction

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod storage;
pub mod telemetry;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(any(feature = "test-utils", test))]
pub mod testing;

pub use api::{ApiError, UserProfileResponse};
pub use auth::{
    AuthService, AuthState, AuthenticatedSession, IdTokenClaims, MfaType, OAuthClient, OAuthError,
    RedirectValidator, SessionContext, SessionEvent, SessionObserver, SingleFlight, StoredSession,
    TokenEndpointClient, TokenSet, UserSession,
};
pub use config::{ClientConfig, Config, LoggingConfig, SessionConfig};
pub use error::{
    ConfigError, ErrorClassification, ErrorSeverity, HttpError, LoginError, RefreshTokenError,
    RequestError, SessionError, StorageError, TokenError,
};
pub use http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use storage::{KeyValueStore, MemoryStore, SessionStorage, StateStorage};
