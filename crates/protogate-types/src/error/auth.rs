//! Authentication errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from token acquisition and refresh.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details", rename_all = "snake_case")]
pub enum AuthError {
    /// Network failure or upstream 5xx during refresh; the account keeps
    /// status `refresh_failed` and stays eligible for a later retry.
    #[error("transient auth failure: {message}")]
    Transient {
        /// Description of the failure (no secrets)
        message: String,
    },

    /// The upstream rejected the refresh token itself; terminal for the
    /// account until its credentials are replaced.
    #[error("refresh token rejected for account: {email}")]
    InvalidToken {
        /// Identifier of the affected account
        email: String,
    },
}

impl AuthError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
