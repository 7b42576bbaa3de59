//! Login state, tokens and the persisted session record.
//!
//! All of these are plain values: created once, cloned freely and replaced
//! wholesale rather than mutated. Serialized field names are camelCase so the
//! persisted JSON matches the records written by other clients of the same
//! store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pkce;

/// One in-flight login attempt.
///
/// Created when a login is initiated, written to the pending-state store and
/// consumed exactly once when the redirect comes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    /// CSRF nonce echoed back in the redirect
    pub state: String,

    /// OpenID Connect nonce expected in the ID token
    pub nonce: String,

    /// PKCE code verifier sent with the code exchange
    pub pkce_verifier: String,

    /// Caller-supplied data carried through the login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<BTreeMap<String, String>>,
}

impl AuthState {
    /// Build an `AuthState` from known values.
    #[must_use]
    pub fn new(
        state: impl Into<String>,
        nonce: impl Into<String>,
        pkce_verifier: impl Into<String>,
        extra_data: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            state: state.into(),
            nonce: nonce.into(),
            pkce_verifier: pkce_verifier.into(),
            extra_data,
        }
    }

    /// Generate a fresh login attempt with random state, nonce and verifier.
    #[must_use]
    pub fn generate(extra_data: Option<BTreeMap<String, String>>) -> Self {
        Self {
            state: pkce::generate_state(),
            nonce: pkce::generate_nonce(),
            pkce_verifier: pkce::generate_code_verifier(),
            extra_data,
        }
    }
}

/// Multi-factor method requested through `acr_values`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaType {
    /// Password re-authentication
    Password,
    /// One-time code from an authenticator app
    Otp,
    /// One-time code over SMS
    Sms,
    /// Electronic ID
    Eid,
}

impl MfaType {
    /// Value sent as `acr_values`.
    #[must_use]
    pub fn acr_value(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Otp => "otp",
            Self::Sms => "sms",
            Self::Eid => "eid",
        }
    }
}

/// Claims read from the OpenID Connect ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenClaims {
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject: the user's UUID
    pub sub: String,

    /// Numeric user id, as a string
    #[serde(default, alias = "legacy_user_id")]
    pub user_id: String,

    /// Expiry as seconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Nonce bound to the login attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Authentication methods used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amr: Option<Vec<String>>,
}

/// Access token, refresh token and ID-token claims of a logged-in user.
///
/// A session holds at most one live `TokenSet`; a refresh replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    /// Bearer token for API calls
    pub access_token: String,

    /// Refresh token; some grants do not issue one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Raw ID token as issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Decoded ID-token claims
    pub id_token_claims: IdTokenClaims,

    /// Granted scopes (space-separated)
    #[serde(default)]
    pub scope: String,

    /// Access token lifetime in seconds
    pub expires_in: i64,

    /// Absolute expiry computed from `expires_in` when the set was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// Create a token set, computing `expires_at` from `expires_in`.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        id_token_claims: IdTokenClaims,
        scope: impl Into<String>,
        expires_in: i64,
    ) -> Self {
        let expires_at = if expires_in > 0 { offset_from_now(expires_in) } else { None };

        Self {
            access_token: access_token.into(),
            refresh_token,
            id_token: None,
            id_token_claims,
            scope: scope.into(),
            expires_in,
            expires_at,
        }
    }

    /// Attach the raw ID token.
    #[must_use]
    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    /// Whether the access token is expired or expires within
    /// `threshold_seconds`. A set without an expiry never counts as expired.
    #[must_use]
    pub fn is_expired(&self, threshold_seconds: i64) -> bool {
        self.expires_at.is_some_and(|at| match offset_from_now(threshold_seconds) {
            Some(limit) => limit >= at,
            None => threshold_seconds > 0,
        })
    }

    /// Seconds until the access token expires.
    #[must_use]
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        self.expires_at.map(|at| (at - Utc::now()).num_seconds())
    }
}

/// `now + seconds`, or `None` when that is not a representable instant.
fn offset_from_now(seconds: i64) -> Option<DateTime<Utc>> {
    Utc::now().checked_add_signed(chrono::Duration::try_seconds(seconds)?)
}

/// Token endpoint success body (RFC 6749 §5.1).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    pub expires_in: i64,
}

/// OAuth error body (RFC 6749 §5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthError {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthError {
    /// Build an error body.
    #[must_use]
    pub fn new(error: impl Into<String>, description: Option<&str>) -> Self {
        Self { error: error.into(), error_description: description.map(str::to_string) }
    }
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {}", self.error, desc),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for OAuthError {}

/// Session record written after every successful exchange or refresh.
///
/// One exists per client id; loading it resumes the last logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    /// OAuth client the tokens were issued to
    pub client_id: String,

    /// Tokens at the time of writing
    pub tokens: TokenSet,

    /// When the record was written
    pub updated_at: DateTime<Utc>,
}

impl StoredSession {
    /// Stamp a record with the current time.
    #[must_use]
    pub fn new(client_id: impl Into<String>, tokens: TokenSet) -> Self {
        Self { client_id: client_id.into(), tokens, updated_at: Utc::now() }
    }
}
