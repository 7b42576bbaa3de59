//! OAuth 2.0 token endpoint client
//!
//! Handles the network side of the login flow:
//! - Authorization URL building (PKCE S256, OIDC nonce, optional MFA)
//! - Authorization code exchange
//! - Token refresh
//! - ID token payload decoding and nonce check

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::{debug, info, warn};
use url::Url;

use super::pkce::PkceChallenge;
use super::traits::TokenEndpointClient;
use super::types::{AuthState, IdTokenClaims, MfaType, OAuthError, TokenResponse, TokenSet};
use crate::config::ClientConfig;
use crate::error::TokenError;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::telemetry::redact_jwt;

/// Token endpoint client for one registered OAuth client.
#[derive(Clone)]
pub struct OAuthClient {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient").field("config", &self.config).finish_non_exhaustive()
    }
}

impl OAuthClient {
    /// Create a client sending its requests through `transport`.
    #[must_use]
    pub fn new(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    /// Client registration this instance talks for.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Authorization URL for `state`; see [`authorization_url`].
    #[must_use]
    pub fn authorization_url(&self, state: &AuthState, mfa: Option<MfaType>) -> Url {
        authorization_url(&self.config, state, mfa)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, TokenError> {
        let request = HttpRequest::post_form(self.config.token_url(), params.iter().copied());
        let response = self.transport.send(request).await?;
        parse_token_response(&response)
    }
}

#[async_trait]
impl TokenEndpointClient for OAuthClient {
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        nonce: &str,
    ) -> Result<TokenSet, TokenError> {
        debug!(client_id = %self.config.client_id, "Exchanging authorization code");

        let response = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", code_verifier),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .await?;

        let tokens = into_token_set(response, None, Some(nonce))?;
        info!(
            sub = %tokens.id_token_claims.sub,
            access_token = %redact_jwt(&tokens.access_token),
            expires_in = tokens.expires_in,
            "Authorization code exchanged"
        );
        Ok(tokens)
    }

    async fn refresh(&self, current: &TokenSet) -> Result<TokenSet, TokenError> {
        let refresh_token = current.refresh_token.as_deref().ok_or(TokenError::NoRefreshToken)?;

        let response = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
            ])
            .await
            .inspect_err(|e| warn!(error = %e, "Token refresh request failed"))?;

        let tokens = into_token_set(response, Some(current), None)?;
        info!(
            sub = %tokens.id_token_claims.sub,
            expires_in = tokens.expires_in,
            "Access token refreshed"
        );
        Ok(tokens)
    }
}

/// Authorization URL for a login attempt.
///
/// Carries the PKCE S256 challenge derived from `state.pkce_verifier`, the
/// OIDC nonce and `prompt=select_account`. `mfa` adds `acr_values`.
#[must_use]
pub fn authorization_url(config: &ClientConfig, state: &AuthState, mfa: Option<MfaType>) -> Url {
    let challenge = PkceChallenge::from_verifier(&state.pkce_verifier);
    let scope = config.scope_string();

    let mut url = config.authorization_url();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("state", &state.state)
            .append_pair("scope", &scope)
            .append_pair("nonce", &state.nonce)
            .append_pair("code_challenge", &challenge.code_challenge)
            .append_pair("code_challenge_method", challenge.challenge_method());

        if let Some(mfa) = mfa {
            query.append_pair("acr_values", mfa.acr_value());
        }
        query.append_pair("prompt", "select_account");
    }
    url
}

/// Decode the payload segment of an ID token.
///
/// The signature is not verified: the token arrives straight from the token
/// endpoint over TLS.
pub fn decode_id_token_claims(id_token: &str) -> Result<IdTokenClaims, TokenError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| TokenError::IdToken("not a JWT".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TokenError::IdToken(format!("invalid base64 payload: {e}")))?;

    serde_json::from_slice(&bytes).map_err(|e| TokenError::IdToken(format!("invalid claims: {e}")))
}

fn parse_token_response(response: &HttpResponse) -> Result<TokenResponse, TokenError> {
    if response.is_success() {
        return response.json().map_err(|e| TokenError::InvalidResponse(e.to_string()));
    }

    match response.json::<OAuthError>() {
        Ok(error) => Err(TokenError::OAuth(error)),
        Err(_) => Err(TokenError::InvalidResponse(format!(
            "HTTP {}: {}",
            response.status,
            response.text()
        ))),
    }
}

/// Build the new token set, carrying over what a refresh does not reissue.
fn into_token_set(
    response: TokenResponse,
    previous: Option<&TokenSet>,
    expected_nonce: Option<&str>,
) -> Result<TokenSet, TokenError> {
    let (claims, id_token) = match (response.id_token, previous) {
        (Some(raw), _) => {
            let claims = decode_id_token_claims(&raw)?;
            if let Some(expected) = expected_nonce {
                if claims.nonce.as_deref() != Some(expected) {
                    return Err(TokenError::IdToken("nonce mismatch".to_string()));
                }
            }
            (claims, Some(raw))
        }
        (None, Some(previous)) => (previous.id_token_claims.clone(), previous.id_token.clone()),
        (None, None) => return Err(TokenError::IdToken("missing id_token".to_string())),
    };

    let refresh_token =
        response.refresh_token.or_else(|| previous.and_then(|p| p.refresh_token.clone()));
    let scope = response
        .scope
        .or_else(|| previous.map(|p| p.scope.clone()))
        .unwrap_or_default();

    let tokens =
        TokenSet::new(response.access_token, refresh_token, claims, scope, response.expires_in);
    Ok(match id_token {
        Some(raw) => tokens.with_id_token(raw),
        None => tokens,
    })
}
