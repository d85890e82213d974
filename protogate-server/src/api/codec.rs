//! Diagnostic encode/decode surface.
//!
//! Exposes the exact codec the gateway uses internally, with no account or
//! auth involvement. Payloads travel base64-wrapped since the envelope is
//! binary.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use protogate_core::ConversationContext;
use protogate_types::error::CodecError;
use protogate_types::protocol::ChatRequest;
use serde::Deserialize;

use crate::state::AppState;

pub async fn encode(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let context = ConversationContext::fresh();
    match state.gateway.codec().encode(&request, &context) {
        Ok(envelope) => Json(serde_json::json!({
            "conversation_id": envelope.conversation_id,
            "request_id": envelope.request_id,
            "payload": STANDARD.encode(&envelope.payload),
        }))
        .into_response(),
        Err(e) => super::error_response(&e.into()),
    }
}

#[derive(Deserialize)]
pub struct DecodeBody {
    /// Base64-wrapped binary payload
    pub payload: String,
    /// What the payload is: a request envelope or a response frame stream
    #[serde(default)]
    pub kind: DecodeKind,
}

#[derive(Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecodeKind {
    #[default]
    Request,
    Response,
}

pub async fn decode(State(state): State<AppState>, Json(body): Json<DecodeBody>) -> Response {
    let payload = match STANDARD.decode(&body.payload) {
        Ok(payload) => payload,
        Err(_) => {
            return super::error_response(
                &CodecError::malformed("payload is not valid base64").into(),
            );
        }
    };

    let codec = state.gateway.codec();
    let result = match body.kind {
        DecodeKind::Request => codec
            .decode_request(&payload)
            .and_then(|request| {
                serde_json::to_value(request)
                    .map_err(|e| CodecError::malformed(e.to_string()))
            }),
        DecodeKind::Response => codec
            .decode_frames(&payload)
            .and_then(|chunks| {
                serde_json::to_value(chunks)
                    .map_err(|e| CodecError::malformed(e.to_string()))
            }),
    };

    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => super::error_response(&e.into()),
    }
}
