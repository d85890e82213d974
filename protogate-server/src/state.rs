//! Shared application state.

use std::sync::Arc;

use protogate_core::gateway::HttpUpstreamTransport;
use protogate_core::{
    AccountRotator, BridgeGateway, BridgeMonitor, CredentialStore, TokenAuthenticator,
};
use tracing::info;

use crate::config::BridgeConfig;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<BridgeGateway>,
    pub monitor: Arc<BridgeMonitor>,
    pub store: Arc<CredentialStore>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn from_config(config: &BridgeConfig) -> anyhow::Result<Self> {
        let store = Arc::new(match (&config.accounts_file, &config.refresh_token) {
            (Some(path), _) => CredentialStore::load(path)
                .map_err(|e| anyhow::anyhow!("failed to load credential store: {}", e))?,
            (None, Some(refresh_token)) => CredentialStore::from_refresh_token(
                refresh_token,
                config.email.as_deref().unwrap_or("env@local"),
            ),
            (None, None) => {
                info!("no credentials configured, running anonymous-only");
                CredentialStore::empty()
            }
        });

        let http = build_http_client()?;
        let authenticator = Arc::new(TokenAuthenticator::new(
            http.clone(),
            config.endpoints(),
            store.clone(),
        ));
        let monitor = Arc::new(BridgeMonitor::new());
        let gateway = Arc::new(BridgeGateway::new(
            Arc::new(HttpUpstreamTransport::new(http, config.upstream_url.clone())),
            authenticator,
            AccountRotator::new(store.clone()),
            monitor.clone(),
            config.quota_threshold,
        ));

        Ok(Self { gateway, monitor, store, started_at: chrono::Utc::now() })
    }
}

/// One client for all upstream traffic, tagged with the client identity
/// headers the vendor expects on every call.
fn build_http_client() -> anyhow::Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        "x-client-version",
        reqwest::header::HeaderValue::from_static(concat!(
            "protogate/",
            env!("CARGO_PKG_VERSION")
        )),
    );
    headers.insert(
        "x-client-os",
        reqwest::header::HeaderValue::from_static(std::env::consts::OS),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))
}
