//! Durable credential storage.
//!
//! Accounts live in a single JSON file (a flat list). Every mutation is
//! persisted immediately with a write-to-temp-then-rename so a crash can
//! never leave a half-written file behind. A store can also be built from a
//! single environment-provided refresh token, in which case it has no
//! backing file and mutations stay in memory.

use std::fs;
use std::path::{Path, PathBuf};

use protogate_types::error::{AuthError, GatewayError, Result};
use protogate_types::models::{Account, AccountStatus, CredentialSet, QuotaSnapshot};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Shared, file-backed account registry.
pub struct CredentialStore {
    path: Option<PathBuf>,
    inner: Mutex<CredentialSet>,
}

impl CredentialStore {
    /// Load accounts from `path`. A missing file is an empty store, not an
    /// error; a file that exists but fails to parse is fatal so a corrupt
    /// registry is never silently truncated.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let set = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| store_error(format!("failed to read accounts file: {}", e)))?;
            serde_json::from_str::<CredentialSet>(&content)
                .map_err(|e| store_error(format!("failed to parse accounts file: {}", e)))?
        } else {
            debug!(path = %path.display(), "accounts file not found, starting empty");
            CredentialSet::default()
        };

        info!(count = set.len(), path = %path.display(), "credential store loaded");
        Ok(Self { path: Some(path), inner: Mutex::new(set) })
    }

    /// Single-account store seeded from an environment refresh token.
    /// Nothing is persisted; token state lives for the process lifetime.
    pub fn from_refresh_token(refresh_token: impl Into<String>, email: impl Into<String>) -> Self {
        let account = Account::new(email, refresh_token);
        info!(email = %account.email, "credential store seeded from environment refresh token");
        Self {
            path: None,
            inner: Mutex::new(CredentialSet::new(vec![account])),
        }
    }

    /// Empty in-memory store (anonymous-only operation).
    pub fn empty() -> Self {
        Self { path: None, inner: Mutex::new(CredentialSet::default()) }
    }

    /// Point-in-time copy of every account.
    pub async fn snapshot(&self) -> CredentialSet {
        self.inner.lock().await.clone()
    }

    pub async fn get(&self, email: &str) -> Option<Account> {
        self.inner.lock().await.find(email).cloned()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Set an account's status and persist.
    pub async fn mark(&self, email: &str, status: AccountStatus) -> Result<()> {
        let mut set = self.inner.lock().await;
        match set.find_mut(email) {
            Some(account) => {
                if account.status != status {
                    info!(email, from = account.status.as_str(), to = status.as_str(), "account status changed");
                    account.status = status;
                }
            }
            None => {
                warn!(email, "mark on unknown account ignored");
                return Ok(());
            }
        }
        self.persist(&set)
    }

    /// Record a freshly refreshed access token and persist.
    pub async fn update_token(&self, email: &str, token: &str, expiry: i64) -> Result<()> {
        let mut set = self.inner.lock().await;
        if let Some(account) = set.find_mut(email) {
            account.update_token(token.to_string(), expiry);
            account.status = AccountStatus::Available;
        }
        self.persist(&set)
    }

    /// Record a quota observation and persist.
    pub async fn update_quota(&self, email: &str, quota: QuotaSnapshot) -> Result<()> {
        let mut set = self.inner.lock().await;
        if let Some(account) = set.find_mut(email) {
            account.update_quota(quota);
        }
        self.persist(&set)
    }

    /// Write the full set back to disk atomically. Skips the write when the
    /// serialized bytes already match the file, so repeated saves of an
    /// unchanged set are byte-identical no-ops.
    fn persist(&self, set: &CredentialSet) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(set)
            .map_err(|e| store_error(format!("failed to serialize accounts: {}", e)))?;

        if let Ok(existing) = fs::read_to_string(path) {
            if existing == content {
                return Ok(());
            }
        }

        write_atomic(path, &content)
    }
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("json.tmp");

    if let Err(e) = fs::write(&temp_path, content) {
        let _ = fs::remove_file(&temp_path);
        return Err(store_error(format!("failed to write temp accounts file: {}", e)));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        store_error(format!("failed to replace accounts file: {}", e))
    })
}

fn store_error(message: String) -> GatewayError {
    GatewayError::Auth(AuthError::Transient { message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("accounts.json")).unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_mark_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        fs::write(
            &path,
            serde_json::to_string(&CredentialSet::new(vec![
                Account::new("a@x.io", "rt-a"),
                Account::new("b@x.io", "rt-b"),
            ]))
            .unwrap(),
        )
        .unwrap();

        let store = CredentialStore::load(&path).unwrap();
        store.mark("a@x.io", AccountStatus::QuotaExhausted).await.unwrap();

        let reloaded = CredentialStore::load(&path).unwrap();
        assert_eq!(
            reloaded.get("a@x.io").await.unwrap().status,
            AccountStatus::QuotaExhausted
        );
        assert_eq!(reloaded.get("b@x.io").await.unwrap().status, AccountStatus::Available);
    }

    #[tokio::test]
    async fn test_persist_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        fs::write(
            &path,
            serde_json::to_string(&CredentialSet::new(vec![Account::new("a@x.io", "rt-a")]))
                .unwrap(),
        )
        .unwrap();

        let store = CredentialStore::load(&path).unwrap();
        store.mark("a@x.io", AccountStatus::InvalidToken).await.unwrap();
        let first = fs::read(&path).unwrap();
        store.mark("a@x.io", AccountStatus::InvalidToken).await.unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_env_store_uses_configured_email() {
        let store = CredentialStore::from_refresh_token("rt-env", "me@corp.example");
        assert!(store.get("me@corp.example").await.is_some());
        assert!(store.get("env@local").await.is_none());
    }

    #[tokio::test]
    async fn test_env_store_has_no_backing_file() {
        let store = CredentialStore::from_refresh_token("rt-env", "env@local");
        assert!(!store.is_empty().await);
        store.mark("env@local", AccountStatus::InvalidToken).await.unwrap();
        assert_eq!(
            store.get("env@local").await.unwrap().status,
            AccountStatus::InvalidToken
        );
    }
}
