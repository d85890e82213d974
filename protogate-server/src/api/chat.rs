//! OpenAI-compatible chat completions handler.

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use protogate_core::GatewayResponse;
use protogate_types::error::GatewayError;
use protogate_types::protocol::ChatRequest;
use tracing::debug;

use crate::state::AppState;

pub async fn chat_completions(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    // A body that does not parse as a chat request is a validation failure
    // in the taxonomy, not a bare framework rejection.
    let Json(request) = match body {
        Ok(json) => json,
        Err(rejection) => {
            return super::error_response(&GatewayError::Validation(rejection.body_text()));
        }
    };
    debug!(model = %request.model, stream = request.stream, "chat completion request");

    match state.gateway.chat(request).await {
        Ok(GatewayResponse::Complete(completion)) => Json(completion).into_response(),
        Ok(GatewayResponse::Stream(stream)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => super::error_response(&e),
    }
}
