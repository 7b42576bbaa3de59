//! Error types for login, token refresh, storage and authenticated requests.
//!
//! Every fallible operation in the crate returns one of the enums below.
//! They all implement [`ErrorClassification`] so callers can drive their own
//! retry and alerting policy without matching on individual variants:
//!
//! | Error | Retryable | Notes |
//! |-------|-----------|-------|
//! | [`LoginError`] | never | surfaced directly to the login caller |
//! | [`RefreshTokenError::RefreshTokenInvalid`] | no | caller should force logout |
//! | [`RefreshTokenError::ConcurrentRefreshFailure`] | yes | no result observed |
//! | [`RefreshTokenError::RefreshRequestFailed`] | yes | network/endpoint failure |
//! | [`StorageError`] | no | passed through unchanged |
//! | [`SessionError::NotLoggedIn`] | no | caller misuse |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::auth::types::OAuthError;
use crate::http::HttpResponse;

/// Standard interface for classifying errors by their characteristics.
pub trait ErrorClassification {
    /// Whether repeating the operation may succeed.
    fn is_retryable(&self) -> bool;

    /// Severity used for logging and alerting decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Whether the error indicates caller misuse or a broken invariant.
    fn is_critical(&self) -> bool;

    /// Suggested retry delay, if one is known.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Transport-level failure of an HTTP call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    /// Request could not be sent or no response was received
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The transport gave up waiting for a response
    #[error("HTTP request timed out")]
    Timeout,

    /// Response body could not be read
    #[error("Failed to read response body: {0}")]
    Body(String),

    /// A header value could not be encoded
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_body() || err.is_decode() {
            Self::Body(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl ErrorClassification for HttpError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Timeout | Self::Body(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Timeout => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Failure of a token endpoint call (code exchange or refresh).
///
/// `Clone` so a single refresh outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The endpoint answered with a structured OAuth error body
    #[error("OAuth error: {0}")]
    OAuth(OAuthError),

    /// The request never produced a response
    #[error(transparent)]
    Transport(#[from] HttpError),

    /// The endpoint answered with something that is not a token response
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// The ID token could not be decoded or did not match the login attempt
    #[error("ID token validation failed: {0}")]
    IdToken(String),

    /// The session holds no refresh token
    #[error("No refresh token available")]
    NoRefreshToken,
}

impl TokenError {
    /// Whether the endpoint rejected the grant itself (expired, revoked or
    /// missing refresh token).
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        match self {
            Self::OAuth(error) => error.error == "invalid_grant",
            Self::NoRefreshToken => true,
            _ => false,
        }
    }
}

/// Errors surfaced to the caller completing a login.
///
/// Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginError {
    /// The redirect carried an `error` parameter
    #[error("Authorization failed: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    AuthorizationError {
        /// OAuth error code from the redirect
        error: String,
        /// Optional `error_description` from the redirect
        description: Option<String>,
    },

    /// The token endpoint rejected the code exchange with an OAuth error body
    #[error("Token request failed: {0}")]
    TokenErrorResponse(OAuthError),

    /// Anything else: missing response, state mismatch, transport failure
    #[error("{0}")]
    UnexpectedError(String),
}

impl LoginError {
    pub(crate) fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedError(message.into())
    }
}

impl From<TokenError> for LoginError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::OAuth(error) => Self::TokenErrorResponse(error),
            other => Self::UnexpectedError(other.to_string()),
        }
    }
}

impl ErrorClassification for LoginError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::AuthorizationError { .. } => ErrorSeverity::Info,
            Self::TokenErrorResponse(_) => ErrorSeverity::Warning,
            Self::UnexpectedError(_) => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Errors from refreshing the tokens of a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshTokenError {
    /// A concurrent refresh was joined but never published a result
    #[error("Concurrent token refresh did not produce a result")]
    ConcurrentRefreshFailure,

    /// The refresh request failed for a reason other than an invalid grant
    #[error("Token refresh request failed: {0}")]
    RefreshRequestFailed(TokenError),

    /// The refresh token is missing, expired or revoked
    #[error("Refresh token is invalid or expired")]
    RefreshTokenInvalid,

    /// The session was logged out while the refresh ran; the result was
    /// discarded
    #[error("Session was logged out during token refresh")]
    LoggedOut,
}

impl RefreshTokenError {
    /// Whether the caller should treat this as a forced logout.
    #[must_use]
    pub fn requires_logout(&self) -> bool {
        matches!(self, Self::RefreshTokenInvalid)
    }
}

impl From<TokenError> for RefreshTokenError {
    fn from(err: TokenError) -> Self {
        if err.is_invalid_grant() {
            Self::RefreshTokenInvalid
        } else {
            Self::RefreshRequestFailed(err)
        }
    }
}

impl ErrorClassification for RefreshTokenError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentRefreshFailure | Self::RefreshRequestFailed(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ConcurrentRefreshFailure | Self::LoggedOut => ErrorSeverity::Warning,
            Self::RefreshRequestFailed(_) | Self::RefreshTokenInvalid => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Failure of the external key/value store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Read, write or decode failure of the backing store
    #[error("Storage error: {0}")]
    UnexpectedError(String),
}

impl StorageError {
    /// Wrap any displayable cause.
    pub fn unexpected(cause: impl fmt::Display) -> Self {
        Self::UnexpectedError(cause.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::unexpected(err)
    }
}

impl ErrorClassification for StorageError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Use of a session after logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The session has no tokens; it must not be used again
    #[error("Can not use tokens of logged-out user")]
    NotLoggedIn,
}

/// Outcome of an authenticated HTTP request that did not produce a usable
/// response.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The session was logged out before or during the request
    #[error("Can not use tokens of logged-out user")]
    NotLoggedIn,

    /// The transport failed
    #[error(transparent)]
    Transport(#[from] HttpError),

    /// The 401 triggered a refresh and the refresh failed
    #[error("Token refresh failed: {0}")]
    Refresh(RefreshTokenError),

    /// The request was retried once with fresh tokens and still got a 401
    #[error("Request unauthorized after token refresh (HTTP {})", .0.status)]
    Unauthorized(Box<HttpResponse>),
}

impl From<SessionError> for RequestError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotLoggedIn => Self::NotLoggedIn,
        }
    }
}

impl From<RefreshTokenError> for RequestError {
    fn from(err: RefreshTokenError) -> Self {
        match err {
            RefreshTokenError::LoggedOut => Self::NotLoggedIn,
            other => Self::Refresh(other),
        }
    }
}

impl ErrorClassification for RequestError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Refresh(e) => e.is_retryable(),
            Self::NotLoggedIn | Self::Unauthorized(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotLoggedIn => ErrorSeverity::Critical,
            Self::Transport(e) => e.severity(),
            Self::Refresh(e) => e.severity(),
            Self::Unauthorized(_) => ErrorSeverity::Warning,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::NotLoggedIn)
    }
}

/// Configuration could not be loaded or is invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is absent
    #[error("Missing configuration value: {0}")]
    Missing(String),

    /// A setting is present but unusable
    #[error("Invalid configuration value: {0}")]
    Invalid(String),

    /// Config file could not be read
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("Failed to parse configuration file: {0}")]
    Parse(String),
}
