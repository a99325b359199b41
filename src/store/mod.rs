//! Credential store.
//!
//! File-backed account store: a locked in-memory map persisted as a JSON
//! array, written atomically (temp file + rename) after every mutation.
//! The connection layer retries opening with backoff; callers only ever see
//! store failures as the generic [`StoreError::Unavailable`].

pub mod secret;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::accounts::Account;

/// Credential store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing file could not be read or written. Surfaced to API
    /// callers only as a generic failure.
    #[error("credential store unavailable")]
    Unavailable(#[source] io::Error),
    #[error("credential store corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("account not found")]
    NotFound,
    #[error("identifier already in use")]
    DuplicateIdentifier,
}

/// Process-wide account store.
///
/// All reads and writes go through a `parking_lot` lock; handler bodies run
/// to completion without preemption around it, so no further coordination is
/// needed at expected scale.
#[derive(Debug)]
pub struct AccountStore {
    path: Option<PathBuf>,
    accounts: RwLock<HashMap<String, Account>>,
}

impl AccountStore {
    /// Open (or create) the store backed by the given file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let accounts = match fs::read(&path) {
            Ok(bytes) => {
                let list: Vec<Account> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|a| (a.id.clone(), a)).collect()
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "account store file absent, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(StoreError::Unavailable(e)),
        };
        Ok(AccountStore {
            path: Some(path),
            accounts: RwLock::new(accounts),
        })
    }

    /// Open the store, retrying transient I/O failures with a fixed backoff.
    ///
    /// Corrupt data is not retried; that needs operator intervention.
    pub async fn open_with_retry(
        path: impl AsRef<Path>,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut last_err = None;
        for attempt in 1..=attempts.max(1) {
            match Self::open(path.to_path_buf()) {
                Ok(store) => return Ok(store),
                Err(e @ StoreError::Corrupt(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        "account store open failed, retrying after backoff"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        Err(last_err.unwrap_or(StoreError::NotFound))
    }

    /// Ephemeral store with no backing file (tests, create-admin dry runs).
    pub fn in_memory() -> Self {
        AccountStore {
            path: None,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new account. Fails if the identifier is already taken.
    pub fn insert(&self, account: Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write();
        let identifier = account.identifier.to_lowercase();
        if accounts
            .values()
            .any(|a| a.identifier.eq_ignore_ascii_case(&identifier))
        {
            return Err(StoreError::DuplicateIdentifier);
        }
        accounts.insert(account.id.clone(), account);
        self.persist(&accounts)
    }

    /// Fetch an account by id. Always a fresh read of live state.
    pub fn get(&self, id: &str) -> Option<Account> {
        self.accounts.read().get(id).cloned()
    }

    /// Fetch an account by its unique identifier (case-insensitive).
    pub fn find_by_identifier(&self, identifier: &str) -> Option<Account> {
        self.accounts
            .read()
            .values()
            .find(|a| a.identifier.eq_ignore_ascii_case(identifier))
            .cloned()
    }

    /// List all accounts.
    pub fn list(&self) -> Vec<Account> {
        let mut all: Vec<Account> = self.accounts.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Apply a mutation to an account and persist. Returns the updated copy.
    pub fn update<F>(&self, id: &str, mutate: F) -> Result<Account, StoreError>
    where
        F: FnOnce(&mut Account),
    {
        let mut accounts = self.accounts.write();
        let account = accounts.get_mut(id).ok_or(StoreError::NotFound)?;
        mutate(account);
        let updated = account.clone();
        self.persist(&accounts)?;
        Ok(updated)
    }

    /// Flip the live `active` flag.
    pub fn set_active(&self, id: &str, active: bool) -> Result<Account, StoreError> {
        self.update(id, |a| a.active = active)
    }

    /// Record a successful login.
    pub fn record_login(&self, id: &str, at: DateTime<Utc>) -> Result<Account, StoreError> {
        self.update(id, |a| a.last_login_at = Some(at))
    }

    /// Delete an account, returning the removed record.
    pub fn remove(&self, id: &str) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.write();
        let removed = accounts.remove(id).ok_or(StoreError::NotFound)?;
        self.persist(&accounts)?;
        Ok(removed)
    }

    /// Number of stored accounts.
    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    fn persist(&self, accounts: &HashMap<String, Account>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut list: Vec<&Account> = accounts.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let bytes = serde_json::to_vec_pretty(&list)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(StoreError::Unavailable)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).map_err(StoreError::Unavailable)?;
        fs::rename(&tmp, path).map_err(StoreError::Unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Role;

    fn sample(id: &str, identifier: &str) -> Account {
        Account {
            id: id.to_string(),
            identifier: identifier.to_string(),
            secret_hash: "pbkdf2-sha256$1$00$00".to_string(),
            role: Role::Agent,
            display_name: "Test".to_string(),
            department: None,
            active: true,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_get_roundtrip() {
        let store = AccountStore::in_memory();
        store.insert(sample("a1", "one@example.com")).unwrap();
        let got = store.get("a1").unwrap();
        assert_eq!(got.identifier, "one@example.com");
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let store = AccountStore::in_memory();
        store.insert(sample("a1", "one@example.com")).unwrap();
        let err = store.insert(sample("a2", "ONE@example.com")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentifier));
    }

    #[test]
    fn test_find_by_identifier_case_insensitive() {
        let store = AccountStore::in_memory();
        store.insert(sample("a1", "One@Example.com")).unwrap();
        assert!(store.find_by_identifier("one@example.com").is_some());
        assert!(store.find_by_identifier("other@example.com").is_none());
    }

    #[test]
    fn test_set_active_and_remove() {
        let store = AccountStore::in_memory();
        store.insert(sample("a1", "one@example.com")).unwrap();

        let updated = store.set_active("a1", false).unwrap();
        assert!(!updated.active);
        assert!(!store.get("a1").unwrap().active);

        let removed = store.remove("a1").unwrap();
        assert_eq!(removed.id, "a1");
        assert!(matches!(store.remove("a1"), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_update_missing_account() {
        let store = AccountStore::in_memory();
        assert!(matches!(
            store.set_active("ghost", false),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("accounts.json");

        {
            let store = AccountStore::open(&path).unwrap();
            store.insert(sample("a1", "one@example.com")).unwrap();
            store.insert(sample("a2", "two@example.com")).unwrap();
            store.set_active("a2", false).unwrap();
        }

        let reopened = AccountStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.get("a1").unwrap().active);
        assert!(!reopened.get("a2").unwrap().active);
    }

    #[test]
    fn test_open_corrupt_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("accounts.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            AccountStore::open(&path),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_open_with_retry_gives_up_on_corrupt() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("accounts.json");
        fs::write(&path, b"{{{{").unwrap();
        let err = AccountStore::open_with_retry(&path, 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
