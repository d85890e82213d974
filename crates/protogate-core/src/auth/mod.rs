//! Token acquisition and refresh.
//!
//! One `TokenAuthenticator` serves the whole process. Refreshes are
//! coalesced per account so a burst of concurrent requests against the same
//! expired token produces exactly one upstream call; everyone else waits on
//! the per-account lock and picks up the cached result.

mod anonymous;
mod jwt;
mod quota;

pub use anonymous::AnonymousSession;

use std::sync::Arc;

use dashmap::DashMap;
use protogate_types::error::{AuthError, GatewayError, Result};
use protogate_types::models::{Account, AccountStatus, AuthToken, TokenOrigin};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialStore;

/// Refresh this many seconds before the cached token actually expires.
pub const EXPIRY_MARGIN_SECS: i64 = 300;

/// Upstream identity endpoints. Every URL can be overridden through the
/// server config for testing against a local mock.
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    /// OAuth token endpoint (form-encoded `grant_type=refresh_token`)
    pub token_url: String,
    /// Vendor GraphQL endpoint (anonymous signup, quota queries)
    pub graphql_url: String,
    /// Identity Toolkit `signInWithCustomToken` endpoint
    pub identity_url: String,
}

impl AuthEndpoints {
    /// Extract the `key` query parameter from the token URL; the identity
    /// endpoint is called with the same key.
    pub(crate) fn api_key(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.token_url).ok()?;
        parsed
            .query_pairs()
            .find(|(name, _)| name == "key")
            .map(|(_, value)| value.into_owned())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Mints and caches upstream access tokens for managed accounts and for the
/// anonymous fallback session.
pub struct TokenAuthenticator {
    http: reqwest::Client,
    endpoints: AuthEndpoints,
    store: Arc<CredentialStore>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    anonymous: Mutex<Option<AnonymousSession>>,
}

impl TokenAuthenticator {
    pub fn new(http: reqwest::Client, endpoints: AuthEndpoints, store: Arc<CredentialStore>) -> Self {
        Self {
            http,
            endpoints,
            store,
            refresh_locks: DashMap::new(),
            anonymous: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Produce a valid bearer token for `account`, refreshing if the cached
    /// one is missing or expires within [`EXPIRY_MARGIN_SECS`].
    pub async fn token_for(&self, account: &Account) -> Result<AuthToken> {
        if account.has_fresh_token(EXPIRY_MARGIN_SECS) {
            // has_fresh_token guarantees both fields are present
            if let (Some(token), Some(expiry)) = (&account.access_token, account.expiry_timestamp) {
                return Ok(AuthToken {
                    token: token.clone(),
                    expiry_timestamp: expiry,
                    origin: TokenOrigin::Account(account.email.clone()),
                });
            }
        }
        self.refresh_account(&account.email, false).await
    }

    /// Refresh unconditionally (upstream rejected the current token with a
    /// 401, so the cached copy is useless regardless of its expiry).
    pub async fn force_refresh(&self, email: &str) -> Result<AuthToken> {
        warn!(email, "forced refresh after upstream 401");
        self.refresh_account(email, true).await
    }

    async fn refresh_account(&self, email: &str, force: bool) -> Result<AuthToken> {
        let lock = self
            .refresh_locks
            .entry(email.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited on the lock. A
        // forced refresh skips the reuse fast-path: the cached token was
        // just rejected upstream, however fresh its expiry looks.
        let account = self
            .store
            .get(email)
            .await
            .ok_or_else(|| GatewayError::Auth(AuthError::Transient {
                message: format!("unknown account: {}", email),
            }))?;
        if !force && account.has_fresh_token(EXPIRY_MARGIN_SECS) {
            if let (Some(token), Some(expiry)) = (&account.access_token, account.expiry_timestamp) {
                debug!(email, "refresh coalesced, reusing token minted by another task");
                return Ok(AuthToken {
                    token: token.clone(),
                    expiry_timestamp: expiry,
                    origin: TokenOrigin::Account(account.email.clone()),
                });
            }
        }

        debug!(email, "access token expiring, refreshing");
        match self.exchange_refresh_token(&account.refresh_token).await {
            Ok((token, expiry, _new_refresh)) => {
                self.store.update_token(email, &token, expiry).await?;
                if let Some(identity) = jwt::token_identity(&token) {
                    debug!(email, identity, "upstream identity claim");
                }
                info!(email, "access token refreshed");
                Ok(AuthToken {
                    token,
                    expiry_timestamp: expiry,
                    origin: TokenOrigin::Account(email.to_string()),
                })
            }
            Err(mut failure) => {
                if let GatewayError::Auth(AuthError::InvalidToken { email: e }) = &mut failure {
                    *e = email.to_string();
                }
                let status = match &failure {
                    GatewayError::Auth(AuthError::InvalidToken { .. }) => AccountStatus::InvalidToken,
                    GatewayError::QuotaExhausted(_) => AccountStatus::QuotaExhausted,
                    _ => AccountStatus::RefreshFailed,
                };
                error!(email, status = status.as_str(), "token refresh failed");
                self.store.mark(email, status).await?;
                Err(failure)
            }
        }
    }

    /// Call the token endpoint and classify failures. Response bodies are
    /// inspected for classification but never propagated verbatim: they can
    /// echo the refresh token back.
    pub(crate) async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<(String, i64, Option<String>)> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::Auth(AuthError::Transient {
                message: format!("token endpoint unreachable: {}", e),
            }))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(classify_refresh_failure(status.as_u16(), &body));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|_| {
            GatewayError::Auth(AuthError::Transient {
                message: "token endpoint returned malformed JSON".to_string(),
            })
        })?;

        let now = chrono::Utc::now().timestamp();
        let expiry = jwt::token_expiry(&parsed.access_token)
            .unwrap_or_else(|| now + parsed.expires_in.unwrap_or(3600));

        Ok((parsed.access_token, expiry, parsed.refresh_token))
    }
}

/// Map a token-endpoint failure to the account fate it implies.
fn classify_refresh_failure(status: u16, body: &str) -> GatewayError {
    if status == 401 || status == 403 || body.contains("invalid_grant") {
        return GatewayError::Auth(AuthError::InvalidToken {
            email: String::new(),
        });
    }
    if status == 429 && (body.contains("quota") || body.contains("limit")) {
        return GatewayError::QuotaExhausted("refresh rejected: quota exhausted".to_string());
    }
    GatewayError::Auth(AuthError::Transient {
        message: format!("token endpoint returned status {}", status),
    })
}
