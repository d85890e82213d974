//! Ephemeral bearer token model.

use serde::{Deserialize, Serialize};

/// Where a bearer token came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "email", rename_all = "snake_case")]
pub enum TokenOrigin {
    Account(String),
    Anonymous,
}

impl TokenOrigin {
    pub fn account_email(&self) -> Option<&str> {
        match self {
            Self::Account(email) => Some(email),
            Self::Anonymous => None,
        }
    }
}

/// An ephemeral bearer credential. Never used past expiry; callers refresh
/// proactively when inside the safety margin rather than waiting for a 401.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthToken {
    /// The bearer token string (a JWT on this upstream)
    pub token: String,
    /// Absolute unix timestamp when the token expires
    pub expiry_timestamp: i64,
    /// Account this token belongs to, or anonymous
    pub origin: TokenOrigin,
}

impl AuthToken {
    pub fn new(token: String, expiry_timestamp: i64, origin: TokenOrigin) -> Self {
        Self { token, expiry_timestamp, origin }
    }

    /// Check if the token expires within the given number of seconds.
    pub fn expires_within(&self, seconds: i64) -> bool {
        chrono::Utc::now().timestamp().saturating_add(seconds) >= self.expiry_timestamp
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(0)
    }

    /// Remaining validity in seconds (0 if already expired).
    pub fn remaining_seconds(&self) -> i64 {
        self.expiry_timestamp.saturating_sub(chrono::Utc::now().timestamp()).max(0)
    }
}
