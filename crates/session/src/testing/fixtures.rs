//! Canned configuration, claims and tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use url::Url;

use crate::auth::types::{IdTokenClaims, TokenSet};
use crate::config::ClientConfig;

/// Client id used by [`client_config`].
pub const TEST_CLIENT_ID: &str = "test-client";

/// Subject of the claims in [`token_set`].
pub const TEST_UUID: &str = "a70b4dbc-d5f0-4f63-9d2e-8ab4d0a5b3c1";

/// Numeric user id of the claims in [`token_set`].
pub const TEST_USER_ID: &str = "12345";

/// Redirect URI used by [`client_config`].
pub const TEST_REDIRECT_URI: &str = "com.example.app:/login";

/// Client config pointing at `server_url`.
///
/// Falls back to `https://login.example.com` when `server_url` does not
/// parse.
#[must_use]
pub fn client_config(server_url: &str) -> ClientConfig {
    let server_url = Url::parse(server_url)
        .or_else(|_| Url::parse("https://login.example.com"))
        .unwrap_or_else(|_| unreachable!("static URL parses"));
    ClientConfig::new(TEST_CLIENT_ID, server_url, TEST_REDIRECT_URI)
}

#[must_use]
pub fn id_token_claims(sub: &str, user_id: &str, nonce: Option<&str>) -> IdTokenClaims {
    IdTokenClaims {
        iss: Some("https://login.example.com/".to_string()),
        sub: sub.to_string(),
        user_id: user_id.to_string(),
        exp: None,
        nonce: nonce.map(str::to_string),
        amr: None,
    }
}

/// Unsigned JWT carrying `claims`.
#[must_use]
pub fn encode_id_token(claims: &IdTokenClaims) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap_or_default());
    format!("{header}.{payload}.signature")
}

/// One-hour token set for the test user.
#[must_use]
pub fn token_set(access_token: &str, refresh_token: Option<&str>) -> TokenSet {
    let claims = id_token_claims(TEST_UUID, TEST_USER_ID, Some("nonce"));
    let id_token = encode_id_token(&claims);
    TokenSet::new(
        access_token,
        refresh_token.map(str::to_string),
        claims,
        "openid offline_access",
        3600,
    )
    .with_id_token(id_token)
}
