//! Redirect response validation.
//!
//! Checks run in a fixed order, and the code exchange is only reached when
//! all of them pass:
//!
//! 1. a response must be present
//! 2. an `error` parameter fails the login, even if `state` matches
//! 3. `state` must equal the pending attempt's state (CSRF defense)
//! 4. `code` must be present

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::pkce::validate_state;
use super::query::parse_query_parameters;
use super::traits::TokenEndpointClient;
use super::types::{AuthState, TokenSet};
use crate::error::LoginError;

/// Validates redirect responses and drives the code exchange.
#[derive(Clone)]
pub struct RedirectValidator {
    token_client: Arc<dyn TokenEndpointClient>,
}

impl RedirectValidator {
    #[must_use]
    pub fn new(token_client: Arc<dyn TokenEndpointClient>) -> Self {
        Self { token_client }
    }

    /// Parse the captured query component.
    ///
    /// # Errors
    /// `UnexpectedError("No authentication response")` when `query` is
    /// absent or blank.
    pub fn parse_response(query: Option<&str>) -> Result<HashMap<String, String>, LoginError> {
        let query = query
            .map(str::trim)
            .filter(|q| !q.is_empty() && *q != "?")
            .ok_or_else(|| LoginError::unexpected("No authentication response"))?;

        Ok(parse_query_parameters(query))
    }

    /// Validate parsed parameters against the pending attempt and exchange
    /// the code.
    pub async fn validate_params(
        &self,
        params: &HashMap<String, String>,
        pending: Option<&AuthState>,
    ) -> Result<TokenSet, LoginError> {
        if let Some(error) = params.get("error") {
            let description = params.get("error_description").cloned();
            warn!(%error, ?description, "Authorization server returned an error");
            return Err(LoginError::AuthorizationError { error: error.clone(), description });
        }

        let received = params.get("state").map(String::as_str);
        let pending = match (pending, received) {
            (Some(pending), Some(received)) if validate_state(&pending.state, received) => pending,
            (None, _) => {
                warn!("Authentication response without a pending login");
                return Err(LoginError::unexpected(
                    "Unsolicited authentication response: state mismatch",
                ));
            }
            (Some(_), _) => {
                warn!("Authentication response state mismatch");
                return Err(LoginError::unexpected("Authentication response state mismatch"));
            }
        };

        let code = params
            .get("code")
            .filter(|code| !code.is_empty())
            .ok_or_else(|| LoginError::unexpected("Missing authorization code"))?;

        debug!("Redirect validated, exchanging code");
        self.token_client
            .exchange_code(code, &pending.pkce_verifier, &pending.nonce)
            .await
            .map_err(LoginError::from)
    }

    /// [`parse_response`](Self::parse_response) followed by
    /// [`validate_params`](Self::validate_params).
    pub async fn validate(
        &self,
        query: Option<&str>,
        pending: Option<&AuthState>,
    ) -> Result<TokenSet, LoginError> {
        let params = Self::parse_response(query)?;
        self.validate_params(&params, pending).await
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::redirect.
    use super::*;
    use crate::auth::types::OAuthError;
    use crate::error::TokenError;
    use crate::testing::{fixtures, ExchangeCall, MockTokenEndpoint};

    fn pending() -> AuthState {
        AuthState::new("s1", "n1", "v1", None)
    }

    fn validator() -> (Arc<MockTokenEndpoint>, RedirectValidator) {
        let endpoint = Arc::new(MockTokenEndpoint::new());
        let validator = RedirectValidator::new(endpoint.clone());
        (endpoint, validator)
    }

    /// Validates the happy path: matching state and a code.
    ///
    /// Assertions:
    /// - the exchange runs exactly once with (code, verifier, nonce)
    /// - its token set is returned unchanged
    #[tokio::test]
    async fn test_matching_state_exchanges_code() {
        let (endpoint, validator) = validator();
        let tokens = fixtures::token_set("at-1", Some("rt-1"));
        endpoint.push_exchange(Ok(tokens.clone()));

        let result = validator.validate(Some("code=abc&state=s1"), Some(&pending())).await;

        assert_eq!(result, Ok(tokens));
        assert_eq!(
            endpoint.exchange_calls(),
            vec![ExchangeCall {
                code: "abc".to_string(),
                code_verifier: "v1".to_string(),
                nonce: "n1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_state_mismatch_never_exchanges() {
        let (endpoint, validator) = validator();

        let result = validator.validate(Some("code=abc&state=other"), Some(&pending())).await;

        assert!(matches!(result, Err(LoginError::UnexpectedError(msg)) if msg.contains("state mismatch")));
        assert!(endpoint.exchange_calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_state_parameter_is_mismatch() {
        let (endpoint, validator) = validator();

        let result = validator.validate(Some("code=abc"), Some(&pending())).await;

        assert!(matches!(result, Err(LoginError::UnexpectedError(msg)) if msg.contains("state mismatch")));
        assert!(endpoint.exchange_calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_pending_state_is_mismatch() {
        let (endpoint, validator) = validator();

        let result = validator.validate(Some("code=abc&state=s1"), None).await;

        assert!(matches!(result, Err(LoginError::UnexpectedError(msg)) if msg.contains("state mismatch")));
        assert!(endpoint.exchange_calls().is_empty());
    }

    #[tokio::test]
    async fn test_error_parameter_precedes_state_check() {
        let (endpoint, validator) = validator();

        let result = validator
            .validate(
                Some("error=access_denied&error_description=User%20cancelled&state=s1&code=abc"),
                Some(&pending()),
            )
            .await;

        assert_eq!(
            result,
            Err(LoginError::AuthorizationError {
                error: "access_denied".to_string(),
                description: Some("User cancelled".to_string()),
            })
        );
        assert!(endpoint.exchange_calls().is_empty());
    }

    #[tokio::test]
    async fn test_error_parameter_with_wrong_state() {
        let (_, validator) = validator();

        let result = validator.validate(Some("error=server_error&state=nope"), None).await;

        assert!(matches!(result, Err(LoginError::AuthorizationError { description: None, .. })));
    }

    #[tokio::test]
    async fn test_empty_response() {
        let (endpoint, validator) = validator();

        for query in [None, Some(""), Some("  "), Some("?")] {
            let result = validator.validate(query, Some(&pending())).await;
            assert_eq!(result, Err(LoginError::unexpected("No authentication response")));
        }
        assert!(endpoint.exchange_calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_code() {
        let (endpoint, validator) = validator();

        let result = validator.validate(Some("state=s1"), Some(&pending())).await;

        assert!(matches!(result, Err(LoginError::UnexpectedError(msg)) if msg.contains("code")));
        assert!(endpoint.exchange_calls().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_failures_are_mapped() {
        let (endpoint, validator) = validator();
        let oauth = OAuthError::new("invalid_grant", Some("code reused"));
        endpoint.push_exchange(Err(TokenError::OAuth(oauth.clone())));
        endpoint.push_exchange(Err(TokenError::InvalidResponse("garbage".to_string())));

        let first = validator.validate(Some("code=abc&state=s1"), Some(&pending())).await;
        assert_eq!(first, Err(LoginError::TokenErrorResponse(oauth)));

        let second = validator.validate(Some("code=abc&state=s1"), Some(&pending())).await;
        assert!(matches!(second, Err(LoginError::UnexpectedError(msg)) if msg.contains("garbage")));
    }
}
