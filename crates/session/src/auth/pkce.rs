//! PKCE (Proof Key for Code Exchange) and login nonces.
//!
//! Implements RFC 7636 S256 challenges plus the random state and nonce values
//! carried by an [`AuthState`](super::types::AuthState).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of the CSRF state value.
pub const STATE_LENGTH: usize = 32;

/// Length of the OpenID Connect nonce.
pub const NONCE_LENGTH: usize = 10;

/// Random alphanumeric string of the given length.
#[must_use]
pub fn random_string(length: usize) -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(length).map(char::from).collect()
}

/// Code verifier: 32 random bytes, base64url without padding (43 chars).
#[must_use]
pub fn generate_code_verifier() -> String {
    let random_bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// `BASE64URL(SHA256(ASCII(code_verifier)))`
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Random state value for CSRF protection.
#[must_use]
pub fn generate_state() -> String {
    random_string(STATE_LENGTH)
}

/// Random nonce bound into the ID token.
#[must_use]
pub fn generate_nonce() -> String {
    random_string(NONCE_LENGTH)
}

/// Exact string comparison that does not short-circuit on the first
/// differing byte.
#[must_use]
pub fn validate_state(expected: &str, actual: &str) -> bool {
    let (expected, actual) = (expected.as_bytes(), actual.as_bytes());
    if expected.len() != actual.len() {
        return false;
    }
    expected.iter().zip(actual).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// Verifier/challenge pair for one authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    /// Kept secret until the code exchange
    pub code_verifier: String,

    /// Sent in the authorization request
    pub code_challenge: String,
}

impl PkceChallenge {
    /// Derive the challenge for an existing verifier.
    #[must_use]
    pub fn from_verifier(verifier: &str) -> Self {
        Self { code_verifier: verifier.to_string(), code_challenge: generate_code_challenge(verifier) }
    }

    /// The challenge method (always "S256")
    #[must_use]
    pub fn challenge_method(&self) -> &'static str {
        "S256"
    }
}
