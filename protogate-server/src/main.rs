//! Protogate - Headless Bridge Daemon
//!
//! A pure Rust HTTP server that:
//! - Serves OpenAI Chat Completions clients on /v1/chat/completions
//! - Translates requests into the upstream protobuf envelope
//! - Rotates upstream accounts under quota pressure
//! - Exposes a diagnostic encode/decode API and a /ws event feed

use std::net::SocketAddr;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod router;
mod state;

use config::BridgeConfig;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = BridgeConfig::from_env();
    info!(
        host = %config.host,
        port = config.port,
        upstream = %config.upstream_url,
        "protogate starting"
    );

    let state = AppState::from_config(&config)?;
    info!(accounts = state.store.snapshot().await.len(), "credential pool ready");

    let app = router::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("listening on http://{}", addr);
    info!("chat endpoint at http://{}/v1/chat/completions", addr);
    info!("event feed at ws://{}/ws", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
