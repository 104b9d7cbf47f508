//! Client-credentials broker: obtains, caches and attaches service tokens for
//! outbound machine-to-machine calls.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use trustgate_auth::AuthoritySet;
use trustgate_core::{ClientId, Clock, StoreError};

use crate::clients::{ClientRegistry, GrantType};
use crate::issuer::{ClientCredentialsResponse, IssueError, TokenIssuer};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("unknown client '{0}'")]
    UnknownClient(String),

    #[error("token acquisition timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("token endpoint rejected the request: {0}")]
    Rejected(String),

    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where service tokens come from.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn client_credentials(
        &self,
        client_id: &ClientId,
        secret: &str,
        scopes: &AuthoritySet,
    ) -> Result<ClientCredentialsResponse, BrokerError>;
}

/// In-process issuer (auth server and tests).
#[derive(Debug, Clone)]
pub struct LocalTokenEndpoint {
    issuer: Arc<TokenIssuer>,
}

impl LocalTokenEndpoint {
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl TokenEndpoint for LocalTokenEndpoint {
    async fn client_credentials(
        &self,
        client_id: &ClientId,
        secret: &str,
        scopes: &AuthoritySet,
    ) -> Result<ClientCredentialsResponse, BrokerError> {
        match self.issuer.issue_client_credentials(client_id, secret, scopes).await {
            Ok(issued) => Ok(issued.into()),
            Err(IssueError::Store(e)) => Err(BrokerError::Store(e)),
            Err(e) => Err(BrokerError::Rejected(e.to_string())),
        }
    }
}

/// Remote issuer reached over HTTP (`POST {token_url}`, form-encoded,
/// HTTP basic client authentication).
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_url: String,
}

impl HttpTokenEndpoint {
    pub fn new(token_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), token_url)
    }

    pub fn with_client(client: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self { client, token_url: token_url.into() }
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn client_credentials(
        &self,
        client_id: &ClientId,
        secret: &str,
        scopes: &AuthoritySet,
    ) -> Result<ClientCredentialsResponse, BrokerError> {
        let scope = scopes.to_strings().join(" ");
        let mut form = vec![("grant_type", GrantType::ClientCredentials.as_str())];
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }

        let resp = self
            .client
            .post(&self.token_url)
            .basic_auth(client_id.as_str(), Some(secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BrokerError::Rejected(format!("status {status}")));
        }
        resp.json::<ClientCredentialsResponse>()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }
}

/// Cached bearer token for one target.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceToken {
    value: String,
    expires_at: DateTime<Utc>,
    refresh_at: DateTime<Utc>,
}

impl core::fmt::Debug for ServiceToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("refresh_at", &self.refresh_at)
            .finish()
    }
}

impl ServiceToken {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Still usable without reacquiring (before the safety margin).
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_at
    }
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Bound on a single acquisition attempt.
    pub timeout: std::time::Duration,
    /// Fraction of the token lifetime after which it is reacquired.
    pub refresh_ratio: f64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_secs(5),
            refresh_ratio: 0.8,
        }
    }
}

type Slot = Arc<Mutex<Option<ServiceToken>>>;

pub struct ClientCredentialsBroker {
    client_id: ClientId,
    client_secret: String,
    registry: Arc<dyn ClientRegistry>,
    endpoint: Arc<dyn TokenEndpoint>,
    clock: Arc<dyn Clock>,
    settings: BrokerSettings,
    // One lock per target; held only while acquiring.
    slots: DashMap<ClientId, Slot>,
}

impl core::fmt::Debug for ClientCredentialsBroker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientCredentialsBroker")
            .field("client_id", &self.client_id)
            .field("settings", &self.settings)
            .field("targets", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl ClientCredentialsBroker {
    pub fn new(
        client_id: ClientId,
        client_secret: impl Into<String>,
        registry: Arc<dyn ClientRegistry>,
        endpoint: Arc<dyn TokenEndpoint>,
        clock: Arc<dyn Clock>,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            client_id,
            client_secret: client_secret.into(),
            registry,
            endpoint,
            clock,
            settings,
            slots: DashMap::new(),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Token for calling `target`, from cache when still fresh.
    ///
    /// Concurrent callers for the same target share one acquisition. A failed
    /// acquisition leaves the slot empty, so the next call starts over. Slots
    /// exist only for registered machine targets.
    pub async fn get_service_token(&self, target: &ClientId) -> Result<ServiceToken, BrokerError> {
        let registered = self
            .registry
            .find_by_client_id(target)
            .await?
            .filter(|c| c.allows(GrantType::ClientCredentials))
            .ok_or_else(|| BrokerError::UnknownClient(target.to_string()))?;

        let slot = self.slots.entry(target.clone()).or_default().clone();
        let mut cached = slot.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh_at(self.clock.now())) {
            return Ok(token.clone());
        }
        *cached = None;

        let token = self.acquire(target, &registered.scopes).await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Attach `Authorization: Bearer` for `target`. A broker failure is fatal
    /// for the outbound call; the request is never sent unauthenticated.
    pub async fn authorize_request(
        &self,
        request: reqwest::RequestBuilder,
        target: &ClientId,
    ) -> Result<reqwest::RequestBuilder, BrokerError> {
        let token = self.get_service_token(target).await?;
        Ok(request.bearer_auth(token.value()))
    }

    /// Drop the cached token for `target` (e.g. after the target answered 401).
    pub async fn evict(&self, target: &ClientId) {
        let slot = self.slots.get(target).map(|s| s.value().clone());
        if let Some(slot) = slot {
            *slot.lock().await = None;
        }
    }

    async fn acquire(
        &self,
        target: &ClientId,
        scopes: &AuthoritySet,
    ) -> Result<ServiceToken, BrokerError> {
        for attempt in 1..=2u8 {
            let call = self
                .endpoint
                .client_credentials(&self.client_id, &self.client_secret, scopes);
            match tokio::time::timeout(self.settings.timeout, call).await {
                Ok(Ok(resp)) => {
                    tracing::debug!(target_client = %target, attempt, "service token acquired");
                    return Ok(self.service_token(resp));
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        target_client = %target,
                        error = %e,
                        "service token acquisition failed"
                    );
                    return Err(e);
                }
                Err(_) => {
                    tracing::warn!(
                        target_client = %target,
                        attempt,
                        "service token acquisition timed out"
                    );
                }
            }
        }
        Err(BrokerError::Timeout(self.settings.timeout))
    }

    fn service_token(&self, resp: ClientCredentialsResponse) -> ServiceToken {
        let now = self.clock.now();
        let configured = self.settings.refresh_ratio;
        let ratio = if configured.is_finite() && configured > 0.0 {
            configured.min(1.0)
        } else {
            0.8
        };
        let ttl_ms = resp.expires_in.max(0).saturating_mul(1000);
        let fresh_ms = (ttl_ms as f64 * ratio) as i64;
        ServiceToken {
            value: resp.access_token,
            expires_at: now + chrono::Duration::milliseconds(ttl_ms),
            refresh_at: now + chrono::Duration::milliseconds(fresh_ms),
        }
    }
}
