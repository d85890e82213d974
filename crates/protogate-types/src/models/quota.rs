//! Quota data model.

use serde::{Deserialize, Serialize};

/// Usage numbers reported by the upstream request-limit endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// Total requests allowed in the current cycle
    pub request_limit: i64,
    /// Requests consumed since the last cycle reset
    pub requests_used: i64,
    /// ISO-8601 time when the upstream resets the cycle, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_refresh_time: Option<String>,
}

impl QuotaSnapshot {
    /// Remaining request units (never negative).
    pub fn remaining(&self) -> i64 {
        self.request_limit.saturating_sub(self.requests_used).max(0)
    }

    /// Whether remaining quota sits at or below `threshold`. A threshold of
    /// zero disables proactive checking and always returns false.
    pub fn is_low(&self, threshold: i64) -> bool {
        threshold > 0 && self.remaining() <= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_never_negative() {
        let quota =
            QuotaSnapshot { request_limit: 10, requests_used: 25, next_refresh_time: None };
        assert_eq!(quota.remaining(), 0);
    }

    #[test]
    fn test_zero_threshold_disables_low_check() {
        let quota = QuotaSnapshot { request_limit: 100, requests_used: 100, next_refresh_time: None };
        assert!(!quota.is_low(0));
        assert!(quota.is_low(1));
    }
}
