//! HTTP handlers.

pub mod chat;
pub mod codec;
pub mod status;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use protogate_types::error::GatewayError;

/// Map the error taxonomy onto HTTP statuses with an OpenAI-style error
/// body. Messages carry at most an account identifier; credentials never
/// reach a client payload.
pub fn error_response(e: &GatewayError) -> Response {
    let status = match e {
        GatewayError::Validation(_) | GatewayError::Codec(_) => StatusCode::BAD_REQUEST,
        GatewayError::QuotaExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::Auth(_) | GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
    };

    let body = serde_json::json!({
        "error": {
            "type": e.code(),
            "code": e.code(),
            "message": e.to_string(),
        }
    });
    (status, Json(body)).into_response()
}
