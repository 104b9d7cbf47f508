//! Refresh-token revocation records.
//!
//! Access tokens are short-lived and never consulted here; only refresh tokens
//! superseded by rotation or presented at logout are recorded, each until its
//! own expiry (after which the verifier rejects it anyway).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use trustgate_core::{StoreError, TokenId};

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record `jti` as revoked. `until` is the token's own expiry.
    ///
    /// Returns `true` only for the caller that recorded it first; the
    /// check and the insert are one atomic step.
    async fn revoke(&self, jti: TokenId, until: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn is_revoked(&self, jti: &TokenId) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    revoked: DashMap<TokenId, DateTime<Utc>>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget records whose token has expired. Returns how many were dropped.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let before = self.revoked.len();
        self.revoked.retain(|_, until| now < *until);
        before - self.revoked.len()
    }

    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn revoke(&self, jti: TokenId, until: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.revoked.entry(jti) {
            Entry::Occupied(mut existing) => {
                if *existing.get() < until {
                    existing.insert(until);
                }
                Ok(false)
            }
            Entry::Vacant(slot) => {
                slot.insert(until);
                Ok(true)
            }
        }
    }

    async fn is_revoked(&self, jti: &TokenId) -> Result<bool, StoreError> {
        Ok(self.revoked.contains_key(jti))
    }
}
