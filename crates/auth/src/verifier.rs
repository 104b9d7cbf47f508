//! Stateless token verification.
//!
//! Runs independently at the gateway (structural [`coarse_check`]) and in each
//! downstream service ([`TokenVerifier::verify`]); no calls back to the issuer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Validation, decode, decode_header};
use thiserror::Error;

use crate::{KeyResolver, Principal, TokenClaims, TokenKind, validate_window};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("token signed with an unknown key")]
    UnknownKey,

    #[error("token signature does not verify")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("expected {expected} token, got {actual}")]
    WrongTokenKind { expected: TokenKind, actual: TokenKind },
}

impl VerifyError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            VerifyError::MalformedToken(_) => "malformed_token",
            VerifyError::UnknownKey => "unknown_key",
            VerifyError::BadSignature => "bad_signature",
            VerifyError::Expired => "token_expired",
            VerifyError::NotYetValid => "token_not_yet_valid",
            VerifyError::WrongTokenKind { .. } => "wrong_token_kind",
        }
    }
}

fn split_segments(token: &str) -> Result<(), VerifyError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(VerifyError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }
    if segments.iter().any(|s| s.is_empty()) {
        return Err(VerifyError::MalformedToken("empty segment".into()));
    }
    Ok(())
}

/// Structural check used by the gateway: three non-empty segments and a
/// decodable header. Signature and claims are left to the services.
pub fn coarse_check(token: &str) -> Result<(), VerifyError> {
    split_segments(token)?;
    decode_header(token).map_err(|e| VerifyError::MalformedToken(e.to_string()))?;
    Ok(())
}

/// Full verifier. Cheap to clone; holds only a handle to the key resolver.
#[derive(Clone)]
pub struct TokenVerifier {
    keys: Arc<dyn KeyResolver>,
    leeway_secs: i64,
}

impl core::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(keys: Arc<dyn KeyResolver>) -> Self {
        Self { keys, leeway_secs: 0 }
    }

    /// Tolerated clock skew, applied to expiry and not-before.
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = i64::try_from(leeway_secs).unwrap_or(i64::MAX);
        self
    }

    /// Verify `token` and derive the request [`Principal`].
    pub fn verify(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Principal, VerifyError> {
        self.verify_claims(token, expected, now).map(Principal::from_claims)
    }

    /// Verify `token` and return its full claims.
    pub fn verify_claims(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, VerifyError> {
        let res = self.check(token, expected, now);
        if let Err(e) = &res {
            tracing::debug!(error = %e, code = e.code(), "token rejected");
        }
        res
    }

    fn check(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, VerifyError> {
        split_segments(token)?;

        let header =
            decode_header(token).map_err(|e| VerifyError::MalformedToken(e.to_string()))?;
        let kid = header.kid.as_deref().ok_or(VerifyError::UnknownKey)?;
        let key = self.keys.resolve(kid, now).ok_or(VerifyError::UnknownKey)?;

        // The key decides the algorithm, never the token header.
        if header.alg != key.algorithm() {
            return Err(VerifyError::BadSignature);
        }

        let mut validation = Validation::new(key.algorithm());
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = decode::<TokenClaims>(token, key.decoding_key(), &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    VerifyError::BadSignature
                }
                _ => VerifyError::MalformedToken(e.to_string()),
            })?;

        validate_window(&claims, now, self.leeway_secs)?;

        if claims.token_kind != expected {
            return Err(VerifyError::WrongTokenKind {
                expected,
                actual: claims.token_kind,
            });
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use trustgate_core::{KeyId, Subject};

    use super::*;
    use crate::{AuthoritySet, KeyMaterial, KeyRing};

    fn ring(kid: &str, secret: &[u8]) -> Arc<KeyRing> {
        let key = KeyMaterial::hmac(KeyId::parse(kid).unwrap(), Algorithm::HS256, secret).unwrap();
        Arc::new(KeyRing::new(key).unwrap())
    }

    fn mint<T: serde::Serialize>(kid: Option<&str>, secret: &[u8], claims: &T) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn claims(kind: TokenKind, now: DateTime<Utc>, ttl: Duration) -> TokenClaims {
        let authorities: AuthoritySet = ["ROLE_USER"].into_iter().collect();
        TokenClaims::new(kind, Subject::parse("user@example.com").unwrap(), authorities, now, ttl)
    }

    fn access(now: DateTime<Utc>) -> TokenClaims {
        claims(TokenKind::Access, now, Duration::minutes(5))
    }

    #[test]
    fn valid_access_token_yields_principal() {
        let now = Utc::now();
        let verifier = TokenVerifier::new(ring("k1", b"secret"));
        let token = mint(Some("k1"), b"secret", &access(now));

        let principal = verifier.verify(&token, TokenKind::Access, now).unwrap();
        assert_eq!(principal.subject.as_str(), "user@example.com");
        assert!(principal.has_authority("ROLE_USER"));
    }

    #[test]
    fn two_segments_is_malformed() {
        let verifier = TokenVerifier::new(ring("k1", b"secret"));
        let err = verifier.verify("abc.def", TokenKind::Access, Utc::now()).unwrap_err();
        assert!(matches!(err, VerifyError::MalformedToken(_)));
        assert!(matches!(coarse_check("abc.def"), Err(VerifyError::MalformedToken(_))));
    }

    #[test]
    fn unknown_or_missing_kid_is_rejected() {
        let now = Utc::now();
        let verifier = TokenVerifier::new(ring("k1", b"secret"));
        let c = claims(TokenKind::Access, now, Duration::minutes(5));

        let other = mint(Some("k2"), b"secret", &c);
        assert_eq!(verifier.verify(&other, TokenKind::Access, now), Err(VerifyError::UnknownKey));

        let no_kid = mint(None, b"secret", &c);
        assert_eq!(verifier.verify(&no_kid, TokenKind::Access, now), Err(VerifyError::UnknownKey));
    }

    #[test]
    fn wrong_secret_is_bad_signature() {
        let now = Utc::now();
        let verifier = TokenVerifier::new(ring("k1", b"secret-A"));
        let token = mint(Some("k1"), b"secret-B", &access(now));
        assert_eq!(verifier.verify(&token, TokenKind::Access, now), Err(VerifyError::BadSignature));
    }

    #[test]
    fn header_algorithm_must_match_key() {
        let now = Utc::now();
        let verifier = TokenVerifier::new(ring("k1", b"secret"));
        let mut header = Header::new(Algorithm::HS512);
        header.kid = Some("k1".into());
        let token = encode(
            &header,
            &claims(TokenKind::Access, now, Duration::minutes(5)),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert_eq!(verifier.verify(&token, TokenKind::Access, now), Err(VerifyError::BadSignature));
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let verifier = TokenVerifier::new(ring("k1", b"secret"));
        let token = mint(Some("k1"), b"secret", &access(now));
        assert_eq!(
            verifier.verify(&token, TokenKind::Access, now + Duration::minutes(5)),
            Err(VerifyError::Expired)
        );
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let now = Utc::now();
        let verifier = TokenVerifier::new(ring("k1", b"secret"));
        let refresh_claims = claims(TokenKind::Refresh, now, Duration::days(1));
        let refresh = mint(Some("k1"), b"secret", &refresh_claims);
        assert_eq!(
            verifier.verify(&refresh, TokenKind::Access, now),
            Err(VerifyError::WrongTokenKind {
                expected: TokenKind::Access,
                actual: TokenKind::Refresh,
            })
        );

        let access = mint(Some("k1"), b"secret", &access(now));
        assert_eq!(
            verifier.verify(&access, TokenKind::Refresh, now),
            Err(VerifyError::WrongTokenKind {
                expected: TokenKind::Refresh,
                actual: TokenKind::Access,
            })
        );
    }

    #[test]
    fn missing_authorities_claim_means_empty_set() {
        let now = Utc::now();
        let verifier = TokenVerifier::new(ring("k1", b"secret"));
        let mut c = claims(TokenKind::Access, now, Duration::minutes(5));
        c.authorities = AuthoritySet::new();
        let token = mint(Some("k1"), b"secret", &c);
        let principal = verifier.verify(&token, TokenKind::Access, now).unwrap();
        assert!(principal.authorities.is_empty());
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let now = Utc::now();
        let verifier = TokenVerifier::new(ring("k1", b"secret"));
        let token = mint(Some("k1"), b"secret", &serde_json::json!({ "sub": "x" }));
        assert!(matches!(
            verifier.verify(&token, TokenKind::Access, now),
            Err(VerifyError::MalformedToken(_))
        ));
    }
}
