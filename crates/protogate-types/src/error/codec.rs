//! Codec errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the protobuf encode/decode bridge. Always terminal for the
/// request: retrying a structurally invalid payload cannot succeed.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details", rename_all = "snake_case")]
pub enum CodecError {
    /// A field required to reconstruct the OpenAI shape was absent
    #[error("missing required field: {field}")]
    MissingField {
        /// Name of the missing field
        field: String,
    },

    /// Input bytes or JSON did not parse as the expected structure
    #[error("malformed input: {message}")]
    MalformedInput {
        /// Description of the parse failure
        message: String,
    },
}

impl CodecError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField { field: field.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput { message: message.into() }
    }
}
