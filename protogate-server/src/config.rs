//! Environment configuration.
//!
//! Everything has a default; production deployments override the vendor
//! endpoints through `PROTOGATE_*` variables.

use std::path::PathBuf;

use protogate_core::AuthEndpoints;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8084;

const DEFAULT_UPSTREAM_URL: &str = "https://app.vendor.example/api/agent/chat";
const DEFAULT_GRAPHQL_URL: &str = "https://app.vendor.example/graphql/v2";
const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";
const DEFAULT_IDENTITY_URL: &str =
    "https://identitytoolkit.googleapis.com/v1/accounts:signInWithCustomToken";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Upstream chat endpoint receiving protobuf envelopes
    pub upstream_url: String,
    pub token_url: String,
    pub graphql_url: String,
    pub identity_url: String,
    /// Credential file; absent means env-token or anonymous-only mode
    pub accounts_file: Option<PathBuf>,
    /// Single-account mode refresh token
    pub refresh_token: Option<String>,
    /// Identifier for the single-account mode entry
    pub email: Option<String>,
    /// Remaining-quota threshold for proactive rotation, 0 disables
    pub quota_threshold: i64,
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("PROTOGATE_HOST", DEFAULT_HOST),
            port: std::env::var("PROTOGATE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            upstream_url: env_or("PROTOGATE_UPSTREAM_URL", DEFAULT_UPSTREAM_URL),
            token_url: env_or("PROTOGATE_TOKEN_URL", DEFAULT_TOKEN_URL),
            graphql_url: env_or("PROTOGATE_GRAPHQL_URL", DEFAULT_GRAPHQL_URL),
            identity_url: env_or("PROTOGATE_IDENTITY_URL", DEFAULT_IDENTITY_URL),
            accounts_file: std::env::var("PROTOGATE_ACCOUNTS_FILE").ok().map(PathBuf::from),
            refresh_token: std::env::var("PROTOGATE_REFRESH_TOKEN").ok(),
            email: std::env::var("PROTOGATE_EMAIL").ok(),
            quota_threshold: std::env::var("PROTOGATE_QUOTA_THRESHOLD")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(0),
        }
    }

    pub fn endpoints(&self) -> AuthEndpoints {
        AuthEndpoints {
            token_url: self.token_url.clone(),
            graphql_url: self.graphql_url.clone(),
            identity_url: self.identity_url.clone(),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
