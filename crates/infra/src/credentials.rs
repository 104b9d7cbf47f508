//! Credential store capability consumed by the token issuer.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use trustgate_core::{IdError, StoreError, Subject};

use crate::password::{HashError, hash_secret};

/// What the issuer needs to know about an account.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub subject: Subject,
    pub password_hash: String,
    /// Role names exactly as stored; canonicalised at issuance.
    pub roles: Vec<String>,
    pub enabled: bool,
    pub locked: bool,
}

impl core::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("subject", &self.subject)
            .field("password_hash", &"<redacted>")
            .field("roles", &self.roles)
            .field("enabled", &self.enabled)
            .field("locked", &self.locked)
            .finish()
    }
}

impl CredentialRecord {
    /// Enabled, unlocked account.
    pub fn active(subject: Subject, password_hash: String, roles: Vec<String>) -> Self {
        Self {
            subject,
            password_hash,
            roles,
            enabled: true,
            locked: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid seed account: {0}")]
    Id(#[from] IdError),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when no such account exists; `Err` only when the store
    /// itself could not answer.
    async fn find_by_subject(
        &self,
        subject: &Subject,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    /// Insert a new account. `Ok(false)` when the subject is already taken;
    /// an existing record is never overwritten.
    async fn create(&self, record: CredentialRecord) -> Result<bool, StoreError>;
}

/// In-memory credential store.
///
/// Intended for tests/dev and for the bundled auth server binary.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: RwLock<HashMap<Subject, CredentialRecord>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the bootstrap accounts: `user@example.com` (ROLE_USER) and
    /// `admin@example.com` (ROLE_USER, ROLE_ADMIN), both with password `password`.
    pub fn with_seed_users() -> Result<Self, SeedError> {
        let store = Self::new();
        let seeds = [
            ("user@example.com", vec!["ROLE_USER"]),
            ("admin@example.com", vec!["ROLE_USER", "ROLE_ADMIN"]),
        ];
        for (email, roles) in seeds {
            let record = CredentialRecord::active(
                Subject::parse(email)?,
                hash_secret("password")?,
                roles.into_iter().map(str::to_string).collect(),
            );
            store.upsert(record)?;
        }
        Ok(store)
    }

    pub fn upsert(&self, record: CredentialRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::unavailable("lock poisoned"))?;
        records.insert(record.subject.clone(), record);
        Ok(())
    }

    /// Returns `false` when the account does not exist.
    pub fn set_enabled(&self, subject: &Subject, enabled: bool) -> Result<bool, StoreError> {
        self.modify(subject, |r| r.enabled = enabled)
    }

    /// Returns `false` when the account does not exist.
    pub fn set_locked(&self, subject: &Subject, locked: bool) -> Result<bool, StoreError> {
        self.modify(subject, |r| r.locked = locked)
    }

    /// Replace the stored role names (e.g. an administrator revoking a role).
    pub fn set_roles(&self, subject: &Subject, roles: Vec<String>) -> Result<bool, StoreError> {
        self.modify(subject, |r| r.roles = roles)
    }

    fn modify(
        &self,
        subject: &Subject,
        f: impl FnOnce(&mut CredentialRecord),
    ) -> Result<bool, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::unavailable("lock poisoned"))?;
        Ok(records.get_mut(subject).map(f).is_some())
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_subject(
        &self,
        subject: &Subject,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::unavailable("lock poisoned"))?;
        Ok(records.get(subject).cloned())
    }

    async fn create(&self, record: CredentialRecord) -> Result<bool, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::unavailable("lock poisoned"))?;
        match records.entry(record.subject.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }
}
