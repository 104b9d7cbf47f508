//! Service wiring: stores, key ring, issuer, verifier and broker built from
//! a [`TrustgateConfig`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use trustgate_auth::{AuthorityRequirement, KeyError, KeyResolver, KeyRing, TokenVerifier};
use trustgate_core::{Clock, SystemClock};
use trustgate_infra::{
    ClientCredentialsBroker, ConfigError, HashError, HttpTokenEndpoint, InMemoryCredentialStore,
    InMemoryRevocationStore, SeedError, StaticClientRegistry, TokenIssuer, TrustgateConfig,
};

use crate::app::{AppState, routes};
use crate::middleware::OpenPaths;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to hash bootstrap secret: {0}")]
    Hash(#[from] HashError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("failed to seed accounts: {0}")]
    Seed(#[from] SeedError),
}

pub fn build_state(config: &TrustgateConfig) -> Result<AppState, BootstrapError> {
    build_state_with_clock(config, Arc::new(SystemClock))
}

pub fn build_state_with_clock(
    config: &TrustgateConfig,
    clock: Arc<dyn Clock>,
) -> Result<AppState, BootstrapError> {
    let keys = Arc::new(KeyRing::new(config.signing_key()?)?);
    let credentials = Arc::new(InMemoryCredentialStore::with_seed_users()?);
    let clients = Arc::new(StaticClientRegistry::bootstrap()?);
    let revocations = Arc::new(InMemoryRevocationStore::new());

    let issuer = TokenIssuer::new(
        keys.clone(),
        credentials,
        clients.clone(),
        clock.clone(),
        config.issuer_settings(),
    )
    .with_revocations(revocations.clone());

    let resolver: Arc<dyn KeyResolver> = keys.clone();
    let verifier = TokenVerifier::new(resolver).with_leeway(config.leeway_secs);

    let broker = match config.broker.identity()? {
        Some((client_id, secret, token_url)) => {
            tracing::info!(client_id = %client_id, %token_url, "client-credentials broker enabled");
            Some(Arc::new(ClientCredentialsBroker::new(
                client_id,
                secret,
                clients,
                Arc::new(HttpTokenEndpoint::new(token_url)),
                clock.clone(),
                config.broker.settings(),
            )))
        }
        None => None,
    };

    Ok(AppState {
        issuer: Arc::new(issuer),
        verifier: Arc::new(verifier),
        keys,
        revocations,
        open_paths: Arc::new(OpenPaths::new(config.open_paths.iter().cloned())),
        operations: Arc::new(routes::operations()),
        request_gate: Arc::new(AuthorityRequirement::Authenticated),
        clock,
        broker,
        http: reqwest::Client::new(),
        product_service_url: config.broker.product_service_url.clone(),
    })
}

/// Periodically drop expired revocation entries and retired keys.
pub fn spawn_maintenance(state: &AppState, every: Duration) -> tokio::task::JoinHandle<()> {
    let keys = state.keys.clone();
    let revocations = state.revocations.clone();
    let clock = state.clock.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = clock.now();
            let revoked = revocations.prune(now);
            let retired = keys.prune(now);
            if revoked > 0 || retired > 0 {
                tracing::debug!(revoked, retired, "maintenance pruned expired entries");
            }
        }
    })
}
