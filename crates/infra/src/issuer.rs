//! Token issuer.
//!
//! Authenticates humans against the [`CredentialStore`] and machine clients
//! against the [`ClientRegistry`], then signs access/refresh tokens with the
//! current signer of the [`KeyRing`]. Holds no session state; the optional
//! [`RevocationStore`] only records superseded refresh tokens.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Header, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use trustgate_auth::{
    Authority, AuthoritySet, KeyResolver, KeyRing, Principal, TokenClaims, TokenKind,
    TokenVerifier, VerifyError,
};
use trustgate_core::{ClientId, Clock, StoreError, Subject, TokenId};

use crate::clients::{ClientRegistry, GrantType};
use crate::credentials::{CredentialRecord, CredentialStore};
use crate::password::{hash_secret, verify_absent, verify_secret};
use crate::revocation::RevocationStore;

pub const BEARER: &str = "Bearer";

/// Role granted to self-registered accounts (before prefixing).
pub const DEFAULT_ROLE: &str = "USER";

const PASSWORD_LEN: core::ops::RangeInclusive<usize> = 8..=64;

/// Why a refresh token was not accepted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefreshRejection {
    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("refresh token has been revoked")]
    Revoked,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IssueError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("account is locked")]
    AccountLocked,

    #[error("invalid refresh token: {0}")]
    InvalidRefreshToken(RefreshRejection),

    #[error("unknown client")]
    UnknownClient,

    #[error("grant type not allowed for this client")]
    UnsupportedGrant,

    #[error("scope '{0}' cannot be granted to a client")]
    InvalidScope(String),

    #[error("invalid registration: {0}")]
    InvalidRegistration(&'static str),

    #[error("an account with this email already exists")]
    AlreadyRegistered,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("token signing failed: {0}")]
    Signing(String),
}

impl IssueError {
    pub fn code(&self) -> &'static str {
        match self {
            IssueError::InvalidCredentials => "invalid_credentials",
            IssueError::AccountDisabled => "account_disabled",
            IssueError::AccountLocked => "account_locked",
            IssueError::InvalidRefreshToken(_) => "invalid_refresh_token",
            IssueError::UnknownClient => "unknown_client",
            IssueError::UnsupportedGrant => "unsupported_grant",
            IssueError::InvalidScope(_) => "invalid_scope",
            IssueError::InvalidRegistration(_) => "invalid_registration",
            IssueError::AlreadyRegistered => "already_registered",
            IssueError::Hashing(_) => "hashing_failed",
            IssueError::Store(_) => "store_unavailable",
            IssueError::Signing(_) => "signing_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuerSettings {
    /// `iss` claim; omitted when `None`.
    pub issuer: Option<String>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Prefix applied to stored role names at issuance.
    pub role_prefix: String,
    /// Issue a new refresh token on every refresh and supersede the old one.
    pub rotate_refresh: bool,
    pub leeway_secs: u64,
}

impl Default for IssuerSettings {
    fn default() -> Self {
        Self {
            issuer: None,
            access_ttl: Duration::hours(1),
            refresh_ttl: Duration::days(1),
            role_prefix: "ROLE_".to_string(),
            rotate_refresh: true,
            leeway_secs: 0,
        }
    }
}

/// Access + refresh token for a human subject.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
    pub subject: Subject,
    pub authorities: AuthoritySet,
}

impl core::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenPair")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("subject", &self.subject)
            .field("authorities", &self.authorities)
            .finish_non_exhaustive()
    }
}

/// Login/refresh response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub email: String,
    pub roles: Vec<String>,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            roles: pair.authorities.to_strings(),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type.to_string(),
            expires_in: pair.expires_in,
            email: pair.subject.to_string(),
        }
    }
}

/// Single access token from the client-credentials grant.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub jti: TokenId,
    pub issued_at: DateTime<Utc>,
    pub expires_in: i64,
    pub scope: AuthoritySet,
}

impl core::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("jti", &self.jti)
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// OAuth2 token endpoint body for the client-credentials grant.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentialsResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: String,
}

impl core::fmt::Debug for ClientCredentialsResponse {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientCredentialsResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl From<IssuedToken> for ClientCredentialsResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            scope: issued.scope.to_strings().join(" "),
            access_token: issued.token,
            token_type: BEARER.to_string(),
            expires_in: issued.expires_in,
        }
    }
}

pub struct TokenIssuer {
    keys: Arc<KeyRing>,
    credentials: Arc<dyn CredentialStore>,
    clients: Arc<dyn ClientRegistry>,
    clock: Arc<dyn Clock>,
    revocations: Option<Arc<dyn RevocationStore>>,
    verifier: TokenVerifier,
    settings: IssuerSettings,
}

impl core::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("settings", &self.settings)
            .field("revocations", &self.revocations.is_some())
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(
        keys: Arc<KeyRing>,
        credentials: Arc<dyn CredentialStore>,
        clients: Arc<dyn ClientRegistry>,
        clock: Arc<dyn Clock>,
        settings: IssuerSettings,
    ) -> Self {
        let resolver: Arc<dyn KeyResolver> = keys.clone();
        let verifier = TokenVerifier::new(resolver).with_leeway(settings.leeway_secs);
        Self {
            keys,
            credentials,
            clients,
            clock,
            revocations: None,
            verifier,
            settings,
        }
    }

    pub fn with_revocations(mut self, store: Arc<dyn RevocationStore>) -> Self {
        self.revocations = Some(store);
        self
    }

    pub fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    pub fn settings(&self) -> &IssuerSettings {
        &self.settings
    }

    /// Authenticate `email`/`password` and issue a token pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, IssueError> {
        let Ok(subject) = Subject::parse(email) else {
            verify_absent(password);
            return Err(IssueError::InvalidCredentials);
        };
        let authorities = self.authenticate(&subject, password).await?;
        let pair = self.issue_tokens(subject, authorities)?;
        tracing::info!(subject = %pair.subject, "login succeeded");
        Ok(pair)
    }

    /// Create an enabled account holding only [`DEFAULT_ROLE`].
    ///
    /// Issues no tokens; the new user logs in as usual.
    pub async fn register(&self, email: &str, password: &str) -> Result<Principal, IssueError> {
        let subject = Subject::parse(email)
            .ok()
            .filter(|s| looks_like_email(s.as_str()))
            .ok_or(IssueError::InvalidRegistration("a valid email address is required"))?;
        if !PASSWORD_LEN.contains(&password.chars().count()) {
            return Err(IssueError::InvalidRegistration(
                "password must be between 8 and 64 characters",
            ));
        }

        let hash = hash_secret(password).map_err(|e| IssueError::Hashing(e.to_string()))?;
        let record =
            CredentialRecord::active(subject.clone(), hash, vec![DEFAULT_ROLE.to_string()]);
        if !self.credentials.create(record).await? {
            return Err(IssueError::AlreadyRegistered);
        }

        tracing::info!(%subject, "account registered");
        let authorities = self.canonical_roles(&[DEFAULT_ROLE.to_string()]);
        Ok(Principal::new(subject, authorities))
    }

    /// Sign a token pair for an already-authenticated subject.
    ///
    /// `authorities` are embedded verbatim in the access token; the refresh
    /// token carries none.
    pub fn issue_tokens(
        &self,
        subject: Subject,
        authorities: AuthoritySet,
    ) -> Result<TokenPair, IssueError> {
        let now = self.clock.now();
        let access = self.claims(
            TokenKind::Access,
            subject.clone(),
            authorities.clone(),
            now,
            self.settings.access_ttl,
        );
        let refresh = self.claims(
            TokenKind::Refresh,
            subject.clone(),
            AuthoritySet::new(),
            now,
            self.settings.refresh_ttl,
        );

        let pair = TokenPair {
            access_token: self.sign(&access, now)?,
            refresh_token: self.sign(&refresh, now)?,
            token_type: BEARER,
            expires_in: access.ttl_secs(),
            subject,
            authorities,
        };
        tracing::debug!(
            subject = %pair.subject,
            access_jti = %access.jti,
            refresh_jti = %refresh.jti,
            "token pair issued"
        );
        Ok(pair)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// Authorities are re-read from the credential store, so disabling,
    /// locking or de-roling an account takes effect at the next refresh.
    /// With rotation the presented token is revoked before anything is
    /// issued; of two concurrent exchanges of one token only one succeeds.
    pub async fn reissue_from_refresh(&self, refresh_token: &str) -> Result<TokenPair, IssueError> {
        let now = self.clock.now();
        let claims = self
            .verifier
            .verify_claims(refresh_token, TokenKind::Refresh, now)
            .map_err(|e| IssueError::InvalidRefreshToken(e.into()))?;

        if let Some(revocations) = &self.revocations {
            let usable = if self.settings.rotate_refresh {
                revocations.revoke(claims.jti, claims.expires_at()).await?
            } else {
                !revocations.is_revoked(&claims.jti).await?
            };
            if !usable {
                tracing::info!(
                    subject = %claims.sub,
                    jti = %claims.jti,
                    "revoked refresh token presented"
                );
                return Err(IssueError::InvalidRefreshToken(RefreshRejection::Revoked));
            }
        }

        let record = self
            .credentials
            .find_by_subject(&claims.sub)
            .await?
            .ok_or(IssueError::InvalidCredentials)?;
        check_account(&record)?;
        let authorities = self.canonical_roles(&record.roles);

        let pair = if self.settings.rotate_refresh {
            self.issue_tokens(claims.sub.clone(), authorities)?
        } else {
            let access = self.claims(
                TokenKind::Access,
                claims.sub.clone(),
                authorities.clone(),
                now,
                self.settings.access_ttl,
            );
            TokenPair {
                access_token: self.sign(&access, now)?,
                refresh_token: refresh_token.to_string(),
                token_type: BEARER,
                expires_in: access.ttl_secs(),
                subject: claims.sub,
                authorities,
            }
        };
        tracing::info!(subject = %pair.subject, "token refreshed");
        Ok(pair)
    }

    /// Revoke a refresh token. Without a revocation store this only checks
    /// the token and relies on access-token expiry.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), IssueError> {
        let claims = self
            .verifier
            .verify_claims(refresh_token, TokenKind::Refresh, self.clock.now())
            .map_err(|e| IssueError::InvalidRefreshToken(e.into()))?;
        match &self.revocations {
            Some(revocations) => {
                let first = revocations.revoke(claims.jti, claims.expires_at()).await?;
                tracing::info!(subject = %claims.sub, already_revoked = !first, "logged out");
            }
            None => tracing::debug!(subject = %claims.sub, "logout without revocation store"),
        }
        Ok(())
    }

    /// Client-credentials grant. The subject is the calling client's id;
    /// `requested` scopes become the token's authorities (empty means the
    /// client's own registered scopes).
    pub async fn issue_client_credentials(
        &self,
        client_id: &ClientId,
        secret: &str,
        requested: &AuthoritySet,
    ) -> Result<IssuedToken, IssueError> {
        let now = self.clock.now();
        let client = self
            .clients
            .find_by_client_id(client_id)
            .await?
            .ok_or(IssueError::UnknownClient)?;
        if !client.verify_secret(secret, now) {
            return Err(IssueError::InvalidCredentials);
        }
        if !client.allows(GrantType::ClientCredentials) {
            return Err(IssueError::UnsupportedGrant);
        }

        let scope = if requested.is_empty() {
            client.scopes.clone()
        } else {
            requested.clone()
        };
        // Role authorities belong to humans; a client may only hold scopes.
        let prefix = self.settings.role_prefix.as_str();
        if let Some(role) = scope
            .iter()
            .find(|a| !prefix.is_empty() && a.as_str().starts_with(prefix))
        {
            return Err(IssueError::InvalidScope(role.to_string()));
        }

        let claims = self
            .claims(
                TokenKind::Access,
                Subject::from(client_id.clone()),
                scope.clone(),
                now,
                client.access_token_ttl,
            )
            .with_client(client_id.clone());
        let token = IssuedToken {
            token: self.sign(&claims, now)?,
            jti: claims.jti,
            issued_at: now,
            expires_in: claims.ttl_secs(),
            scope,
        };
        tracing::info!(client_id = %client_id, jti = %token.jti, "client credentials token issued");
        Ok(token)
    }

    async fn authenticate(
        &self,
        subject: &Subject,
        password: &str,
    ) -> Result<AuthoritySet, IssueError> {
        let Some(record) = self.credentials.find_by_subject(subject).await? else {
            verify_absent(password);
            return Err(IssueError::InvalidCredentials);
        };
        if !verify_secret(password, &record.password_hash) {
            return Err(IssueError::InvalidCredentials);
        }
        check_account(&record)?;
        Ok(self.canonical_roles(&record.roles))
    }

    fn canonical_roles(&self, roles: &[String]) -> AuthoritySet {
        roles
            .iter()
            .map(|r| Authority::role(r, &self.settings.role_prefix))
            .collect()
    }

    fn claims(
        &self,
        kind: TokenKind,
        subject: Subject,
        authorities: AuthoritySet,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> TokenClaims {
        let claims = TokenClaims::new(kind, subject, authorities, now, ttl);
        match &self.settings.issuer {
            Some(iss) => claims.with_issuer(iss.clone()),
            None => claims,
        }
    }

    fn sign(&self, claims: &TokenClaims, now: DateTime<Utc>) -> Result<String, IssueError> {
        let key = self
            .keys
            .signing_key(now)
            .map_err(|e| IssueError::Signing(e.to_string()))?;
        let encoding = key
            .encoding_key()
            .ok_or_else(|| IssueError::Signing(format!("key '{}' cannot sign", key.kid())))?;
        let mut header = Header::new(key.algorithm());
        header.kid = Some(key.kid().to_string());
        encode(&header, claims, encoding).map_err(|e| IssueError::Signing(e.to_string()))
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn check_account(record: &CredentialRecord) -> Result<(), IssueError> {
    if !record.enabled {
        return Err(IssueError::AccountDisabled);
    }
    if record.locked {
        return Err(IssueError::AccountLocked);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use jsonwebtoken::Algorithm;
    use proptest::prelude::*;
    use trustgate_auth::{AuthorityRequirement, Decision, Deny, KeyMaterial, authorize};
    use trustgate_core::{FixedClock, KeyId, SystemClock};

    use super::*;
    use crate::clients::{RegisteredClient, StaticClientRegistry};
    use crate::credentials::InMemoryCredentialStore;
    use crate::password::hash_secret;
    use crate::revocation::InMemoryRevocationStore;

    fn hmac(kid: &str) -> KeyMaterial {
        let secret = format!("{kid}-secret");
        KeyMaterial::hmac(KeyId::parse(kid).unwrap(), Algorithm::HS256, secret.as_bytes()).unwrap()
    }

    struct Fixture {
        issuer: TokenIssuer,
        store: Arc<InMemoryCredentialStore>,
        clock: Arc<FixedClock>,
    }

    fn fixture(settings: IssuerSettings) -> Fixture {
        let store = Arc::new(InMemoryCredentialStore::new());
        store
            .upsert(CredentialRecord::active(
                Subject::parse("user@example.com").unwrap(),
                hash_secret("password").unwrap(),
                vec!["USER".into()],
            ))
            .unwrap();
        let clients = Arc::new(StaticClientRegistry::new([
            RegisteredClient::new(
                ClientId::parse("order-service").unwrap(),
                hash_secret("order-secret").unwrap(),
            )
            .with_grants([GrantType::ClientCredentials])
            .with_scopes(["order:read", "order:write"]),
            RegisteredClient::new(
                ClientId::parse("web").unwrap(),
                hash_secret("web-secret").unwrap(),
            )
            .with_grants([GrantType::AuthorizationCode]),
        ]));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let issuer = TokenIssuer::new(
            Arc::new(KeyRing::new(hmac("key-a")).unwrap()),
            store.clone(),
            clients,
            clock.clone(),
            settings,
        )
        .with_revocations(Arc::new(InMemoryRevocationStore::new()));
        Fixture { issuer, store, clock }
    }

    fn user() -> Subject {
        Subject::parse("user@example.com").unwrap()
    }

    fn verifier(issuer: &TokenIssuer) -> TokenVerifier {
        let resolver: Arc<dyn KeyResolver> = issuer.keys().clone();
        TokenVerifier::new(resolver)
    }

    #[tokio::test]
    async fn login_canonicalises_roles() {
        let f = fixture(IssuerSettings::default());
        let pair = f.issuer.login("user@example.com", "password").await.unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 3600);

        let principal = verifier(&f.issuer)
            .verify(&pair.access_token, TokenKind::Access, f.clock.now())
            .unwrap();
        assert_eq!(principal.authorities.to_strings(), vec!["ROLE_USER".to_string()]);
    }

    #[tokio::test]
    async fn login_failures_are_distinct() {
        let f = fixture(IssuerSettings::default());
        assert_eq!(
            f.issuer.login("user@example.com", "wrong").await.unwrap_err(),
            IssueError::InvalidCredentials
        );
        assert_eq!(
            f.issuer.login("nobody@example.com", "password").await.unwrap_err(),
            IssueError::InvalidCredentials
        );

        f.store.set_locked(&user(), true).unwrap();
        assert_eq!(
            f.issuer.login("user@example.com", "password").await.unwrap_err(),
            IssueError::AccountLocked
        );

        f.store.set_enabled(&user(), false).unwrap();
        assert_eq!(
            f.issuer.login("user@example.com", "password").await.unwrap_err(),
            IssueError::AccountDisabled
        );
    }

    struct DownStore;

    #[async_trait]
    impl CredentialStore for DownStore {
        async fn find_by_subject(
            &self,
            _: &Subject,
        ) -> Result<Option<CredentialRecord>, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn create(&self, _: CredentialRecord) -> Result<bool, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
    }

    #[tokio::test]
    async fn store_outage_is_not_invalid_credentials() {
        let issuer = TokenIssuer::new(
            Arc::new(KeyRing::new(hmac("key-a")).unwrap()),
            Arc::new(DownStore),
            Arc::new(StaticClientRegistry::default()),
            Arc::new(FixedClock::new(Utc::now())),
            IssuerSettings::default(),
        );
        let err = issuer.login("user@example.com", "password").await.unwrap_err();
        assert!(matches!(err, IssueError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn registered_account_logs_in_as_user() {
        let f = fixture(IssuerSettings::default());
        let principal = f.issuer.register("new@example.com", "longenough").await.unwrap();
        assert_eq!(principal.authorities.to_strings(), vec!["ROLE_USER".to_string()]);

        let pair = f.issuer.login("new@example.com", "longenough").await.unwrap();
        assert!(pair.authorities.contains("ROLE_USER"));
        assert_eq!(pair.authorities.len(), 1);
    }

    #[tokio::test]
    async fn registration_rejects_duplicates_and_bad_input() {
        let f = fixture(IssuerSettings::default());
        assert_eq!(
            f.issuer.register("user@example.com", "longenough").await.unwrap_err(),
            IssueError::AlreadyRegistered
        );
        // The existing account keeps its password.
        assert!(f.issuer.login("user@example.com", "password").await.is_ok());

        for email in ["", "no-at-sign", "@example.com", "a@localhost"] {
            assert!(matches!(
                f.issuer.register(email, "longenough").await.unwrap_err(),
                IssueError::InvalidRegistration(_)
            ));
        }
        assert!(matches!(
            f.issuer.register("short@example.com", "short").await.unwrap_err(),
            IssueError::InvalidRegistration(_)
        ));
    }

    #[tokio::test]
    async fn registration_surfaces_store_outage() {
        let issuer = TokenIssuer::new(
            Arc::new(KeyRing::new(hmac("key-a")).unwrap()),
            Arc::new(DownStore),
            Arc::new(StaticClientRegistry::default()),
            Arc::new(FixedClock::new(Utc::now())),
            IssuerSettings::default(),
        );
        let err = issuer.register("new@example.com", "longenough").await.unwrap_err();
        assert!(matches!(err, IssueError::Store(_)));
    }

    #[tokio::test]
    async fn scenario_a_issue_verify_authorize() {
        let f = fixture(IssuerSettings::default());
        let authorities: AuthoritySet = ["ROLE_USER"].into_iter().collect();
        let pair = f.issuer.issue_tokens(user(), authorities).unwrap();
        let principal = verifier(&f.issuer)
            .verify(&pair.access_token, TokenKind::Access, f.clock.now())
            .unwrap();

        assert_eq!(
            authorize(Some(&principal), &AuthorityRequirement::any_of(["ROLE_ADMIN"])),
            Decision::Deny(Deny::Forbidden)
        );
        assert_eq!(
            authorize(Some(&principal), &AuthorityRequirement::any_of(["ROLE_USER", "ROLE_ADMIN"])),
            Decision::Allow
        );
    }

    #[tokio::test]
    async fn scenario_b_disabled_account_cannot_refresh() {
        let f = fixture(IssuerSettings::default());
        let pair = f.issuer.login("user@example.com", "password").await.unwrap();
        f.store.set_enabled(&user(), false).unwrap();

        assert_eq!(
            f.issuer.reissue_from_refresh(&pair.refresh_token).await.unwrap_err(),
            IssueError::AccountDisabled
        );
    }

    #[tokio::test]
    async fn refresh_rereads_authorities() {
        let f = fixture(IssuerSettings::default());
        let pair = f.issuer.login("user@example.com", "password").await.unwrap();
        f.store.set_roles(&user(), vec!["USER".into(), "ADMIN".into()]).unwrap();

        let next = f.issuer.reissue_from_refresh(&pair.refresh_token).await.unwrap();
        assert!(next.authorities.contains("ROLE_ADMIN"));
    }

    #[tokio::test]
    async fn access_token_is_not_a_refresh_token() {
        let f = fixture(IssuerSettings::default());
        let pair = f.issuer.login("user@example.com", "password").await.unwrap();
        let err = f.issuer.reissue_from_refresh(&pair.access_token).await.unwrap_err();
        assert!(matches!(
            err,
            IssueError::InvalidRefreshToken(RefreshRejection::Verify(
                VerifyError::WrongTokenKind { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn rotation_supersedes_old_refresh_token() {
        let f = fixture(IssuerSettings::default());
        let pair = f.issuer.login("user@example.com", "password").await.unwrap();

        let next = f.issuer.reissue_from_refresh(&pair.refresh_token).await.unwrap();
        assert_ne!(next.refresh_token, pair.refresh_token);
        assert_eq!(
            f.issuer.reissue_from_refresh(&pair.refresh_token).await.unwrap_err(),
            IssueError::InvalidRefreshToken(RefreshRejection::Revoked)
        );
        assert!(f.issuer.reissue_from_refresh(&next.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn reuse_policy_keeps_refresh_token() {
        let f = fixture(IssuerSettings { rotate_refresh: false, ..IssuerSettings::default() });
        let pair = f.issuer.login("user@example.com", "password").await.unwrap();
        let next = f.issuer.reissue_from_refresh(&pair.refresh_token).await.unwrap();
        assert_eq!(next.refresh_token, pair.refresh_token);
    }

    #[tokio::test]
    async fn logout_revokes_refresh_token() {
        let f = fixture(IssuerSettings::default());
        let pair = f.issuer.login("user@example.com", "password").await.unwrap();
        f.issuer.logout(&pair.refresh_token).await.unwrap();
        assert_eq!(
            f.issuer.reissue_from_refresh(&pair.refresh_token).await.unwrap_err(),
            IssueError::InvalidRefreshToken(RefreshRejection::Revoked)
        );
    }

    /// Credential store that yields before answering, like a real round trip.
    struct YieldingStore(Arc<InMemoryCredentialStore>);

    #[async_trait]
    impl CredentialStore for YieldingStore {
        async fn find_by_subject(
            &self,
            subject: &Subject,
        ) -> Result<Option<CredentialRecord>, StoreError> {
            tokio::task::yield_now().await;
            self.0.find_by_subject(subject).await
        }

        async fn create(&self, record: CredentialRecord) -> Result<bool, StoreError> {
            tokio::task::yield_now().await;
            self.0.create(record).await
        }
    }

    #[tokio::test]
    async fn concurrent_refreshes_of_one_token_yield_one_successor() {
        let f = fixture(IssuerSettings::default());
        let issuer = TokenIssuer::new(
            f.issuer.keys().clone(),
            Arc::new(YieldingStore(f.store.clone())),
            Arc::new(StaticClientRegistry::default()),
            f.clock.clone(),
            IssuerSettings::default(),
        )
        .with_revocations(Arc::new(InMemoryRevocationStore::new()));
        let pair = issuer.issue_tokens(user(), AuthoritySet::new()).unwrap();

        let (a, b) = tokio::join!(
            issuer.reissue_from_refresh(&pair.refresh_token),
            issuer.reissue_from_refresh(&pair.refresh_token),
        );
        assert!(a.is_ok() != b.is_ok(), "exactly one exchange may succeed");
        let lost = if a.is_ok() { b } else { a };
        assert_eq!(
            lost.unwrap_err(),
            IssueError::InvalidRefreshToken(RefreshRejection::Revoked)
        );
    }

    #[tokio::test]
    async fn unknown_account_costs_a_hash_verification() {
        let f = fixture(IssuerSettings::default());
        // Warm the absent-account hash so its one-off generation is not timed.
        verify_absent("warm-up");

        let timed = |email: &'static str| {
            let issuer = &f.issuer;
            async move {
                let started = std::time::Instant::now();
                for _ in 0..3 {
                    let _ = issuer.login(email, "wrong").await;
                }
                started.elapsed()
            }
        };
        let known = timed("user@example.com").await;
        let unknown = timed("nobody@example.com").await;
        assert!(
            unknown * 5 >= known,
            "unknown account answered in {unknown:?}, known in {known:?}"
        );
    }

    #[tokio::test]
    async fn expired_refresh_token_is_rejected() {
        let f = fixture(IssuerSettings::default());
        let pair = f.issuer.login("user@example.com", "password").await.unwrap();
        f.clock.advance(Duration::days(1));
        assert_eq!(
            f.issuer.reissue_from_refresh(&pair.refresh_token).await.unwrap_err(),
            IssueError::InvalidRefreshToken(RefreshRejection::Verify(VerifyError::Expired))
        );
    }

    #[tokio::test]
    async fn scenario_c_key_rotation_keeps_old_tokens_valid() {
        let f = fixture(IssuerSettings::default());
        let before = f.issuer.issue_tokens(user(), ["ROLE_USER"].into_iter().collect()).unwrap();

        let now = f.clock.now();
        f.issuer.keys().rotate(hmac("key-b"), now + Duration::hours(1)).unwrap();
        let after = f.issuer.issue_tokens(user(), ["ROLE_USER"].into_iter().collect()).unwrap();

        let header_b = jsonwebtoken::decode_header(&after.access_token).unwrap();
        assert_eq!(header_b.kid.as_deref(), Some("key-b"));
        let header_a = jsonwebtoken::decode_header(&before.access_token).unwrap();
        assert_eq!(header_a.kid.as_deref(), Some("key-a"));

        let v = verifier(&f.issuer);
        let almost_an_hour = now + Duration::minutes(59);
        assert!(v.verify(&before.access_token, TokenKind::Access, almost_an_hour).is_ok());
        assert_eq!(
            v.verify(&before.access_token, TokenKind::Access, now + Duration::hours(1)),
            Err(VerifyError::UnknownKey)
        );
        assert!(v.verify(&after.access_token, TokenKind::Access, almost_an_hour).is_ok());
    }

    #[tokio::test]
    async fn client_credentials_subject_is_client_id() {
        let f = fixture(IssuerSettings::default());
        let id = ClientId::parse("order-service").unwrap();
        let requested: AuthoritySet = ["product:read"].into_iter().collect();
        let issued =
            f.issuer.issue_client_credentials(&id, "order-secret", &requested).await.unwrap();

        let claims = verifier(&f.issuer)
            .verify_claims(&issued.token, TokenKind::Access, f.clock.now())
            .unwrap();
        assert_eq!(claims.sub.as_str(), "order-service");
        assert_eq!(claims.client_id, Some(id.clone()));
        assert_eq!(claims.authorities, requested);

        let none = AuthoritySet::new();
        let own = f.issuer.issue_client_credentials(&id, "order-secret", &none).await.unwrap();
        assert!(own.scope.contains("order:write"));
    }

    #[tokio::test]
    async fn client_credentials_failures() {
        let f = fixture(IssuerSettings::default());
        let none = AuthoritySet::new();
        let orders = ClientId::parse("order-service").unwrap();

        assert_eq!(
            f.issuer
                .issue_client_credentials(&ClientId::parse("ghost").unwrap(), "x", &none)
                .await
                .unwrap_err(),
            IssueError::UnknownClient
        );
        assert_eq!(
            f.issuer.issue_client_credentials(&orders, "wrong", &none).await.unwrap_err(),
            IssueError::InvalidCredentials
        );
        assert_eq!(
            f.issuer
                .issue_client_credentials(&ClientId::parse("web").unwrap(), "web-secret", &none)
                .await
                .unwrap_err(),
            IssueError::UnsupportedGrant
        );
        let escalate: AuthoritySet = ["ROLE_ADMIN"].into_iter().collect();
        assert_eq!(
            f.issuer
                .issue_client_credentials(&orders, "order-secret", &escalate)
                .await
                .unwrap_err(),
            IssueError::InvalidScope("ROLE_ADMIN".into())
        );
    }

    #[test]
    fn token_response_uses_camel_case() {
        let pair = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
            token_type: BEARER,
            expires_in: 3600,
            subject: user(),
            authorities: ["ROLE_USER"].into_iter().collect(),
        };
        let json = serde_json::to_value(TokenResponse::from(pair)).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["tokenType"], "Bearer");
        assert_eq!(json["expiresIn"], 3600);
        assert_eq!(json["email"], "user@example.com");
        assert_eq!(json["roles"], serde_json::json!(["ROLE_USER"]));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn issued_authorities_survive_verification(
            local in "[a-z]{1,12}",
            authorities in prop::collection::btree_set("[A-Za-z_:]{1,16}", 0..6),
        ) {
            let issuer = TokenIssuer::new(
                Arc::new(KeyRing::new(hmac("key-a")).unwrap()),
                Arc::new(InMemoryCredentialStore::new()),
                Arc::new(StaticClientRegistry::default()),
                Arc::new(SystemClock),
                IssuerSettings::default(),
            );
            let subject = Subject::parse(format!("{local}@example.com")).unwrap();
            let set: AuthoritySet = authorities.into_iter().collect();

            let pair = issuer.issue_tokens(subject.clone(), set.clone()).unwrap();
            let principal = verifier(&issuer)
                .verify(&pair.access_token, TokenKind::Access, Utc::now())
                .unwrap();
            prop_assert_eq!(principal.subject, subject);
            prop_assert_eq!(principal.authorities, set);
        }
    }
}
