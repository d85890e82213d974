//! Quota probing.
//!
//! The upstream exposes per-account request limits through GraphQL. Probes
//! are throttled to one per account per minute so rotation decisions never
//! add a meaningful amount of upstream traffic.

use protogate_types::error::{AuthError, GatewayError, Result};
use protogate_types::models::{Account, QuotaSnapshot};
use serde_json::json;
use tracing::{debug, warn};

use super::TokenAuthenticator;

/// Minimum spacing between quota probes for one account.
const PROBE_INTERVAL_SECS: i64 = 60;

const REQUEST_LIMIT_QUERY: &str = r#"
query GetRequestLimitInfo {
  user {
    requestLimitInfo {
      requestLimit
      requestsUsedSinceLastRefresh
      nextRefreshTime
    }
  }
}"#;

impl TokenAuthenticator {
    /// Probe quota for `account` if the threshold is enabled and the last
    /// observation is stale. Persists the snapshot and returns it; returns
    /// the cached snapshot when inside the probe interval. Probe failures
    /// are logged and swallowed: quota knowledge is advisory, never a
    /// reason to fail a request.
    pub async fn maybe_probe_quota(
        &self,
        account: &Account,
        bearer_token: &str,
        threshold: i64,
    ) -> Option<QuotaSnapshot> {
        if threshold == 0 {
            return None;
        }

        let now = chrono::Utc::now().timestamp();
        if let Some(last) = account.last_quota_check {
            if now - last < PROBE_INTERVAL_SECS {
                return account.quota.clone();
            }
        }

        match self.fetch_quota(bearer_token).await {
            Ok(snapshot) => {
                debug!(
                    email = %account.email,
                    used = snapshot.requests_used,
                    limit = snapshot.request_limit,
                    "quota probed"
                );
                if let Err(e) = self.store().update_quota(&account.email, snapshot.clone()).await {
                    warn!(email = %account.email, error = %e, "failed to persist quota snapshot");
                }
                Some(snapshot)
            }
            Err(e) => {
                warn!(email = %account.email, error = %e, "quota probe failed");
                account.quota.clone()
            }
        }
    }

    /// Raw `GetRequestLimitInfo` query.
    pub async fn fetch_quota(&self, bearer_token: &str) -> Result<QuotaSnapshot> {
        let body = json!({
            "operationName": "GetRequestLimitInfo",
            "query": REQUEST_LIMIT_QUERY,
            "variables": {}
        });

        let response = self
            .http
            .post(&self.endpoints.graphql_url)
            .bearer_auth(bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transient(format!("quota endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transient(format!("quota query returned status {}", status)));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|_| transient("quota query returned malformed JSON".to_string()))?;

        let info = payload
            .pointer("/data/user/requestLimitInfo")
            .ok_or_else(|| transient("quota response missing requestLimitInfo".to_string()))?;

        Ok(QuotaSnapshot {
            request_limit: info.get("requestLimit").and_then(|v| v.as_i64()).unwrap_or(0),
            requests_used: info
                .get("requestsUsedSinceLastRefresh")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            next_refresh_time: info
                .get("nextRefreshTime")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

fn transient(message: String) -> GatewayError {
    GatewayError::Auth(AuthError::Transient { message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthEndpoints;
    use crate::credentials::CredentialStore;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_quota_parses_limit_info() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "user": { "requestLimitInfo": {
                    "requestLimit": 150,
                    "requestsUsedSinceLastRefresh": 148,
                    "nextRefreshTime": "2026-09-01T00:00:00Z"
                }}}
            })))
            .mount(&server)
            .await;

        let auth = TokenAuthenticator::new(
            reqwest::Client::new(),
            AuthEndpoints {
                token_url: format!("{}/token?key=k", server.uri()),
                graphql_url: format!("{}/graphql", server.uri()),
                identity_url: format!("{}/identity", server.uri()),
            },
            Arc::new(CredentialStore::empty()),
        );

        let snapshot = auth.fetch_quota("at-1").await.unwrap();
        assert_eq!(snapshot.request_limit, 150);
        assert_eq!(snapshot.requests_used, 148);
        assert_eq!(snapshot.remaining(), 2);
        assert!(snapshot.is_low(5));
        assert!(!snapshot.is_low(0));
    }

    #[tokio::test]
    async fn test_probe_disabled_when_threshold_zero() {
        let server = MockServer::start().await;
        let auth = TokenAuthenticator::new(
            reqwest::Client::new(),
            AuthEndpoints {
                token_url: format!("{}/token?key=k", server.uri()),
                graphql_url: format!("{}/graphql", server.uri()),
                identity_url: format!("{}/identity", server.uri()),
            },
            Arc::new(CredentialStore::empty()),
        );

        let account = Account::new("a@x.io", "rt");
        assert!(auth.maybe_probe_quota(&account, "at", 0).await.is_none());
    }
}
