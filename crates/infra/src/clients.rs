//! Registered (machine) clients and their registry.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use trustgate_auth::AuthoritySet;
use trustgate_core::{ClientId, StoreError};

use crate::password::{HashError, hash_secret, verify_secret};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::ClientCredentials => "client_credentials",
        }
    }
}

impl core::fmt::Display for GrantType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            other => Err(other.to_string()),
        }
    }
}

/// Hashed client secret. `expires_at` is set on a superseded secret that is
/// still accepted during a rotation grace window.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecret {
    pub hash: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl core::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientSecret")
            .field("hash", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl ClientSecret {
    pub fn new(hash: String) -> Self {
        Self { hash, expires_at: None }
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|end| now < end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredClient {
    pub client_id: ClientId,
    pub secrets: Vec<ClientSecret>,
    pub grant_types: BTreeSet<GrantType>,
    /// Scopes granted as authorities on client-credentials tokens.
    pub scopes: AuthoritySet,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

impl RegisteredClient {
    pub fn new(client_id: ClientId, secret_hash: String) -> Self {
        Self {
            client_id,
            secrets: vec![ClientSecret::new(secret_hash)],
            grant_types: BTreeSet::new(),
            scopes: AuthoritySet::new(),
            access_token_ttl: Duration::hours(1),
            refresh_token_ttl: Duration::days(1),
        }
    }

    pub fn with_grants(mut self, grants: impl IntoIterator<Item = GrantType>) -> Self {
        self.grant_types.extend(grants);
        self
    }

    pub fn with_scopes<I, A>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<trustgate_auth::Authority>,
    {
        for scope in scopes {
            self.scopes.insert(scope);
        }
        self
    }

    pub fn with_ttls(mut self, access: Duration, refresh: Duration) -> Self {
        self.access_token_ttl = access;
        self.refresh_token_ttl = refresh;
        self
    }

    pub fn allows(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    /// Any live secret matches.
    pub fn verify_secret(&self, plain: &str, now: DateTime<Utc>) -> bool {
        self.secrets
            .iter()
            .filter(|s| s.is_live_at(now))
            .any(|s| verify_secret(plain, &s.hash))
    }

    /// New value with `new_hash` as the primary secret. Current secrets stay
    /// accepted until `grace_until`; already-expired ones are dropped.
    pub fn rotate_secret(&self, new_hash: String, grace_until: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.secrets = std::iter::once(ClientSecret::new(new_hash))
            .chain(self.secrets.iter().map(|s| ClientSecret {
                hash: s.hash.clone(),
                expires_at: Some(match s.expires_at {
                    Some(end) if end < grace_until => end,
                    _ => grace_until,
                }),
            }))
            .collect();
        next
    }

    /// Drop secrets whose grace window has closed.
    pub fn without_expired_secrets(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.secrets.retain(|s| s.is_live_at(now));
        next
    }
}

#[async_trait]
pub trait ClientRegistry: Send + Sync {
    async fn find_by_client_id(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<RegisteredClient>, StoreError>;
}

/// Registry held in memory; the whole table is swapped atomically on reload.
#[derive(Debug, Default)]
pub struct StaticClientRegistry {
    clients: ArcSwap<HashMap<ClientId, RegisteredClient>>,
}

impl StaticClientRegistry {
    pub fn new(clients: impl IntoIterator<Item = RegisteredClient>) -> Self {
        let table: HashMap<_, _> = clients
            .into_iter()
            .map(|c| (c.client_id.clone(), c))
            .collect();
        Self { clients: ArcSwap::from_pointee(table) }
    }

    /// The bootstrap clients of the deployment: the gateway plus the order,
    /// product and customer services.
    pub fn bootstrap() -> Result<Self, HashError> {
        let mut clients = Vec::with_capacity(4);

        if let Ok(id) = ClientId::parse("gateway-client") {
            clients.push(
                RegisteredClient::new(id, hash_secret("gateway-secret")?)
                    .with_grants([
                        GrantType::AuthorizationCode,
                        GrantType::RefreshToken,
                        GrantType::ClientCredentials,
                    ])
                    .with_scopes(["openid", "profile", "read", "write"]),
            );
        }

        for (name, secret, scopes) in [
            ("order-service", "order-service-secret", ["order:read", "order:write"]),
            ("product-service", "product-service-secret", ["product:read", "product:write"]),
            ("customer-service", "customer-service-secret", ["customer:read", "customer:write"]),
        ] {
            let Ok(id) = ClientId::parse(name) else {
                continue;
            };
            clients.push(
                RegisteredClient::new(id, hash_secret(secret)?)
                    .with_grants([GrantType::ClientCredentials])
                    .with_scopes(scopes),
            );
        }

        Ok(Self::new(clients))
    }

    /// Replace the whole table.
    pub fn reload(&self, clients: impl IntoIterator<Item = RegisteredClient>) {
        let table: HashMap<_, _> = clients
            .into_iter()
            .map(|c| (c.client_id.clone(), c))
            .collect();
        self.clients.store(Arc::new(table));
        tracing::info!(clients = self.clients.load().len(), "client registry reloaded");
    }

    pub fn upsert(&self, client: RegisteredClient) {
        self.clients.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(client.client_id.clone(), client.clone());
            next
        });
    }

    /// Rotate a client's secret, keeping the old one valid until `grace_until`.
    /// Returns `false` when the client is unknown.
    pub fn rotate_secret(
        &self,
        client_id: &ClientId,
        new_hash: String,
        grace_until: DateTime<Utc>,
    ) -> bool {
        let mut found = false;
        self.clients.rcu(|current| {
            let mut next = HashMap::clone(current);
            found = match next.get_mut(client_id) {
                Some(client) => {
                    *client = client.rotate_secret(new_hash.clone(), grace_until);
                    true
                }
                None => false,
            };
            next
        });
        if found {
            tracing::info!(client_id = %client_id, %grace_until, "client secret rotated");
        }
        found
    }
}

#[async_trait]
impl ClientRegistry for StaticClientRegistry {
    async fn find_by_client_id(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<RegisteredClient>, StoreError> {
        Ok(self.clients.load().get(client_id).cloned())
    }
}
