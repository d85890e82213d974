//! Account model and related types.

use super::QuotaSnapshot;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an upstream account.
///
/// Transitions are monotonic within one quota cycle: an account only moves
/// away from `Available`, never back, until an external reset (new cycle or
/// a manual edit of the credential file) restores it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Available,
    QuotaExhausted,
    RefreshFailed,
    InvalidToken,
}

impl AccountStatus {
    /// Whether a later refresh attempt could still succeed for this status.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Available | Self::RefreshFailed)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::QuotaExhausted => "quota_exhausted",
            Self::RefreshFailed => "refresh_failed",
            Self::InvalidToken => "invalid_token",
        }
    }
}

impl Default for AccountStatus {
    fn default() -> Self {
        Self::Available
    }
}

/// One upstream identity: a refresh token plus its cached access token and
/// bookkeeping state. Persisted as one record in the credential file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Email address (or opaque id) identifying the account
    pub email: String,
    /// Long-lived refresh token used to mint access tokens
    pub refresh_token: String,
    /// Account lifecycle status
    #[serde(default)]
    pub status: AccountStatus,
    /// Cached bearer token, absent until the first refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Absolute unix timestamp when the cached token expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_timestamp: Option<i64>,
    /// Last reported quota numbers, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaSnapshot>,
    /// Unix timestamp of the last quota probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_quota_check: Option<i64>,
}

impl Account {
    /// Create a fresh account from an identifier and refresh token.
    pub fn new(email: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            refresh_token: refresh_token.into(),
            status: AccountStatus::Available,
            access_token: None,
            expiry_timestamp: None,
            quota: None,
            last_quota_check: None,
        }
    }

    pub const fn is_available(&self) -> bool {
        matches!(self.status, AccountStatus::Available)
    }

    /// Whether the cached access token exists and stays valid for at least
    /// `margin_secs` more seconds.
    pub fn has_fresh_token(&self, margin_secs: i64) -> bool {
        match (&self.access_token, self.expiry_timestamp) {
            (Some(_), Some(expiry)) => {
                chrono::Utc::now().timestamp().saturating_add(margin_secs) < expiry
            }
            _ => false,
        }
    }

    /// Store a newly minted access token.
    pub fn update_token(&mut self, access_token: String, expiry_timestamp: i64) {
        self.access_token = Some(access_token);
        self.expiry_timestamp = Some(expiry_timestamp);
    }

    /// Record a quota probe result.
    pub fn update_quota(&mut self, quota: QuotaSnapshot) {
        self.quota = Some(quota);
        self.last_quota_check = Some(chrono::Utc::now().timestamp());
    }
}

/// Ordered collection of accounts. Insertion order is rotation order; an
/// empty set is valid and means anonymous-only operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CredentialSet {
    pub accounts: Vec<Account>,
}

impl CredentialSet {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self { accounts }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn find(&self, email: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.email == email)
    }

    pub fn find_mut(&mut self, email: &str) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.email == email)
    }

    /// Count accounts currently in the given status.
    pub fn count_by_status(&self, status: AccountStatus) -> usize {
        self.accounts.iter().filter(|a| a.status == status).count()
    }
}
