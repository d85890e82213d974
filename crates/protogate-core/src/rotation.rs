//! Account rotation.
//!
//! Selection is round-robin with memory: each pick starts just after the
//! previously selected account, so load spreads across the pool instead of
//! hammering index zero. Demotions persist through the credential store, so
//! a restart resumes with the same pool state.

use std::sync::Arc;

use protogate_types::error::Result;
use protogate_types::models::{Account, AccountStatus};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::credentials::CredentialStore;

/// Picks which account serves the next request.
pub struct AccountRotator {
    store: Arc<CredentialStore>,
    cursor: Mutex<usize>,
}

impl AccountRotator {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store, cursor: Mutex::new(0) }
    }

    /// The account that should serve the next request: the first
    /// `available` account scanning from the cursor, wrapping once. The
    /// cursor points just past the selected index, so successive picks
    /// cycle through the pool in original relative order. `None` means the
    /// pool is exhausted and the caller falls back to anonymous.
    pub async fn select_active(&self) -> Option<Account> {
        let set = self.store.snapshot().await;
        if set.is_empty() {
            return None;
        }

        let mut cursor = self.cursor.lock().await;
        for offset in 0..set.len() {
            let index = (*cursor + offset) % set.len();
            let account = &set.accounts[index];
            if account.is_available() {
                *cursor = (index + 1) % set.len();
                return Some(account.clone());
            }
        }

        warn!(
            total = set.len(),
            exhausted = set.count_by_status(AccountStatus::QuotaExhausted),
            invalid = set.count_by_status(AccountStatus::InvalidToken),
            "no available account in pool"
        );
        None
    }

    /// The upstream said this account is out of quota. Demote it; the scan
    /// skips demoted accounts, so no cursor bookkeeping is needed.
    pub async fn report_quota_exhausted(&self, email: &str) -> Result<()> {
        info!(email, "rotating away from quota-exhausted account");
        self.store.mark(email, AccountStatus::QuotaExhausted).await
    }

    /// The account's refresh token was rejected; terminal until its
    /// credentials are replaced.
    pub async fn report_invalid(&self, email: &str) -> Result<()> {
        warn!(email, "rotating away from account with rejected credentials");
        self.store.mark(email, AccountStatus::InvalidToken).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protogate_types::models::CredentialSet;

    async fn rotator_with(
        emails: &[&str],
    ) -> (AccountRotator, Arc<CredentialStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let set = CredentialSet::new(
            emails.iter().map(|e| Account::new(*e, format!("rt-{}", e))).collect(),
        );
        std::fs::write(&path, serde_json::to_string(&set).unwrap()).unwrap();
        let store = Arc::new(CredentialStore::load(path).unwrap());
        (AccountRotator::new(store.clone()), store, dir)
    }

    #[tokio::test]
    async fn test_selection_cycles_in_relative_order() {
        let (rotator, _store, _dir) = rotator_with(&["a@x.io", "b@x.io", "c@x.io"]).await;

        assert_eq!(rotator.select_active().await.unwrap().email, "a@x.io");
        assert_eq!(rotator.select_active().await.unwrap().email, "b@x.io");
        assert_eq!(rotator.select_active().await.unwrap().email, "c@x.io");
        assert_eq!(rotator.select_active().await.unwrap().email, "a@x.io");
    }

    #[tokio::test]
    async fn test_demotion_mid_cycle_preserves_relative_order() {
        let (rotator, _store, _dir) = rotator_with(&["a@x.io", "b@x.io", "c@x.io"]).await;

        assert_eq!(rotator.select_active().await.unwrap().email, "a@x.io");
        rotator.report_quota_exhausted("a@x.io").await.unwrap();

        assert_eq!(rotator.select_active().await.unwrap().email, "b@x.io");
        assert_eq!(rotator.select_active().await.unwrap().email, "c@x.io");
        assert_eq!(rotator.select_active().await.unwrap().email, "b@x.io");
    }

    #[tokio::test]
    async fn test_skips_demoted_accounts_and_wraps() {
        let (rotator, store, _dir) = rotator_with(&["a@x.io", "b@x.io", "c@x.io"]).await;

        store.mark("b@x.io", AccountStatus::InvalidToken).await.unwrap();
        rotator.report_quota_exhausted("a@x.io").await.unwrap();

        assert_eq!(rotator.select_active().await.unwrap().email, "c@x.io");

        rotator.report_quota_exhausted("c@x.io").await.unwrap();
        assert!(rotator.select_active().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_pool_selects_none() {
        let store = Arc::new(CredentialStore::empty());
        let rotator = AccountRotator::new(store);
        assert!(rotator.select_active().await.is_none());
    }
}
