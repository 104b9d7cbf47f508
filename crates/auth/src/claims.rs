use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use trustgate_core::{ClientId, Subject, TokenId};

use crate::{AuthoritySet, VerifyError};

/// Purpose of a token. Verifiers always state which kind they expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl core::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TokenKind::Access => f.write_str("access"),
            TokenKind::Refresh => f.write_str("refresh"),
        }
    }
}

/// Signed token payload. Timestamps are seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject: user email or machine client id. Never empty.
    pub sub: Subject,

    pub iat: i64,

    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Token id, used by revocation records.
    pub jti: TokenId,

    pub token_kind: TokenKind,

    /// Granted authorities. Absent on refresh tokens; absent means empty.
    #[serde(default, skip_serializing_if = "AuthoritySet::is_empty")]
    pub authorities: AuthoritySet,

    /// Set on client-credentials tokens: the machine client that requested it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

impl TokenClaims {
    pub fn new(
        kind: TokenKind,
        sub: Subject,
        authorities: AuthoritySet,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let iat = issued_at.timestamp();
        Self {
            iss: None,
            sub,
            iat,
            // A zero or negative ttl would break exp > iat.
            exp: iat.saturating_add(ttl.num_seconds().max(1)),
            nbf: None,
            jti: TokenId::new(),
            token_kind: kind,
            authorities,
            client_id: None,
        }
    }

    pub fn with_issuer(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    pub fn with_not_before(mut self, nbf: DateTime<Utc>) -> Self {
        self.nbf = Some(nbf.timestamp());
        self
    }

    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn ttl_secs(&self) -> i64 {
        self.exp - self.iat
    }
}

/// Check the validity window of already-decoded claims.
///
/// `leeway_secs` tolerates clock skew between issuer and verifier.
pub fn validate_window(
    claims: &TokenClaims,
    now: DateTime<Utc>,
    leeway_secs: i64,
) -> Result<(), VerifyError> {
    if claims.exp <= claims.iat {
        return Err(VerifyError::MalformedToken("expiry is not after issued-at".into()));
    }
    let now = now.timestamp();
    if now >= claims.exp.saturating_add(leeway_secs) {
        return Err(VerifyError::Expired);
    }
    if let Some(nbf) = claims.nbf {
        if now.saturating_add(leeway_secs) < nbf {
            return Err(VerifyError::NotYetValid);
        }
    }
    Ok(())
}
