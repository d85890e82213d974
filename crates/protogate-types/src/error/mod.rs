//! Typed error definitions for Protogate.
//!
//! Errors here are serializable for API responses, displayable for logging,
//! and matchable for retry/rotation logic. Secrets never appear in error
//! payloads; messages carry at most an account identifier.

mod auth;
mod codec;

pub use auth::AuthError;
pub use codec::CodecError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error surfaced by the bridge gateway. Every failure a client can
/// observe maps onto exactly one of these kinds.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "error", rename_all = "snake_case")]
pub enum GatewayError {
    /// Authentication failed after the bounded retry budget
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Every rotation candidate and the anonymous fallback are exhausted
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Request or response could not be translated
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Upstream chat endpoint unreachable or returned a server error
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Malformed client-supplied request; never retried
    #[error("Validation error: {0}")]
    Validation(String),
}

impl GatewayError {
    /// Whether a retry against another account could succeed. Codec and
    /// validation failures are structural and always terminal.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Auth(err) => err.is_transient(),
            Self::QuotaExhausted(_) | Self::UpstreamUnavailable(_) => true,
            Self::Codec(_) | Self::Validation(_) => false,
        }
    }

    /// Stable taxonomy code for client-facing error payloads.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth_error",
            Self::QuotaExhausted(_) => "quota_exhausted",
            Self::Codec(_) => "codec_error",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Validation(_) => "validation_error",
        }
    }
}

/// Standard Result type using GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;
