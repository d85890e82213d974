//! Route declarations.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::status::service_status))
        .route("/health", get(api::status::health))
        .route("/healthz", get(api::status::health))
        .route("/v1/chat/completions", post(api::chat::chat_completions))
        .route("/encode", post(api::codec::encode))
        .route("/decode", post(api::codec::decode))
        .route("/ws", get(api::ws::event_feed))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
