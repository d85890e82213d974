//! Anonymous fallback identity.
//!
//! When no managed account can serve a request, the gateway signs up a
//! throwaway anonymous user: a GraphQL mutation yields a custom sign-in
//! token, the identity endpoint trades it for a refresh token, and the
//! ordinary token endpoint mints the access token. The session lives only
//! in process memory; anonymous refresh tokens are never written to disk.

use protogate_types::error::{AuthError, GatewayError, Result};
use protogate_types::models::{AuthToken, TokenOrigin};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{TokenAuthenticator, EXPIRY_MARGIN_SECS};

const CREATE_ANONYMOUS_USER_MUTATION: &str = r#"
mutation CreateAnonymousUser($input: CreateAnonymousUserInput!) {
  createAnonymousUser(input: $input) {
    idToken
    expiresAt
  }
}"#;

/// An in-memory anonymous identity: the refresh token minted at signup plus
/// the most recent access token derived from it.
#[derive(Debug, Clone)]
pub struct AnonymousSession {
    pub refresh_token: String,
    pub token: AuthToken,
}

impl TokenAuthenticator {
    /// Produce a valid anonymous bearer token, reusing the cached session
    /// when possible and signing up a fresh anonymous user otherwise.
    pub async fn anonymous_token(&self) -> Result<AuthToken> {
        // Holding the lock across the whole mint coalesces concurrent
        // fallbacks into a single signup.
        let mut session = self.anonymous.lock().await;

        if let Some(existing) = session.as_ref() {
            if !existing.token.expires_within(EXPIRY_MARGIN_SECS) {
                return Ok(existing.token.clone());
            }

            debug!("anonymous token expiring, refreshing session");
            match self.exchange_refresh_token(&existing.refresh_token).await {
                Ok((token, expiry, new_refresh)) => {
                    let refreshed = AnonymousSession {
                        refresh_token: new_refresh
                            .unwrap_or_else(|| existing.refresh_token.clone()),
                        token: AuthToken::new(token, expiry, TokenOrigin::Anonymous),
                    };
                    let auth_token = refreshed.token.clone();
                    *session = Some(refreshed);
                    return Ok(auth_token);
                }
                Err(e) => {
                    // Anonymous users get reaped upstream; start over.
                    warn!(error = %e, "anonymous session refresh failed, signing up again");
                    *session = None;
                }
            }
        }

        let fresh = self.create_anonymous_session().await?;
        let token = fresh.token.clone();
        *session = Some(fresh);
        Ok(token)
    }

    async fn create_anonymous_session(&self) -> Result<AnonymousSession> {
        let custom_token = self.create_anonymous_user().await?;
        let refresh_token = self.sign_in_with_custom_token(&custom_token).await?;
        let (token, expiry, rotated) = self.exchange_refresh_token(&refresh_token).await?;

        info!("anonymous session established");
        Ok(AnonymousSession {
            refresh_token: rotated.unwrap_or(refresh_token),
            token: AuthToken::new(token, expiry, TokenOrigin::Anonymous),
        })
    }

    /// GraphQL `CreateAnonymousUser` mutation; returns the custom sign-in
    /// token.
    async fn create_anonymous_user(&self) -> Result<String> {
        let body = json!({
            "operationName": "CreateAnonymousUser",
            "query": CREATE_ANONYMOUS_USER_MUTATION,
            "variables": {
                "input": {
                    "anonymousUserType": "NATIVE_CLIENT",
                    "expirationType": "LONG_LIVED"
                }
            }
        });

        let response = self
            .http
            .post(&self.endpoints.graphql_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transient(format!("anonymous signup unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transient(format!("anonymous signup returned status {}", status)));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|_| transient("anonymous signup returned malformed JSON".to_string()))?;

        payload
            .pointer("/data/createAnonymousUser/idToken")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| transient("anonymous signup response missing idToken".to_string()))
    }

    /// Identity Toolkit `signInWithCustomToken`; returns the refresh token.
    async fn sign_in_with_custom_token(&self, custom_token: &str) -> Result<String> {
        let mut request = self.http.post(&self.endpoints.identity_url);
        if let Some(key) = self.endpoints.api_key() {
            request = request.query(&[("key", key)]);
        }

        let response = request
            .json(&json!({ "token": custom_token, "returnSecureToken": true }))
            .send()
            .await
            .map_err(|e| transient(format!("identity endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transient(format!("identity endpoint returned status {}", status)));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|_| transient("identity endpoint returned malformed JSON".to_string()))?;

        payload
            .get("refreshToken")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| transient("identity response missing refreshToken".to_string()))
    }
}

fn transient(message: String) -> GatewayError {
    GatewayError::Auth(AuthError::Transient { message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialStore;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn authenticator(server: &MockServer) -> TokenAuthenticator {
        TokenAuthenticator::new(
            reqwest::Client::new(),
            super::super::AuthEndpoints {
                token_url: format!("{}/token?key=test-key", server.uri()),
                graphql_url: format!("{}/graphql", server.uri()),
                identity_url: format!("{}/identity", server.uri()),
            },
            Arc::new(CredentialStore::empty()),
        )
    }

    #[tokio::test]
    async fn test_full_anonymous_flow_and_caching() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("CreateAnonymousUser"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "createAnonymousUser": { "idToken": "custom-1" } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/identity"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "idToken": "id-1",
                "refreshToken": "anon-rt-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("anon-rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "anon-at-1",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = authenticator(&server).await;

        let first = auth.anonymous_token().await.unwrap();
        assert_eq!(first.token, "anon-at-1");
        assert_eq!(first.origin, TokenOrigin::Anonymous);

        // Second call must reuse the cached session (expect(1) on each mock).
        let second = auth.anonymous_token().await.unwrap();
        assert_eq!(second.token, "anon-at-1");
    }

    #[tokio::test]
    async fn test_signup_failure_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let auth = authenticator(&server).await;
        let err = auth.anonymous_token().await.unwrap_err();
        assert!(matches!(err, GatewayError::Auth(AuthError::Transient { .. })));
    }
}
