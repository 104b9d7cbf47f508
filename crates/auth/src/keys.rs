//! Key material provider.
//!
//! A [`KeyRing`] holds every key that is currently trusted, selected by the
//! `kid` found in a token header. Readers take a lock-free snapshot
//! ([`arc_swap::ArcSwap`]); writers (rotation, retirement, pruning) build a new
//! [`KeySet`] and publish it in one atomic swap, so an in-flight verification
//! never observes a half-updated set.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use thiserror::Error;

use trustgate_core::KeyId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid key material for '{kid}': {reason}")]
    Invalid { kid: String, reason: String },

    #[error("algorithm {alg:?} is not usable with key '{kid}'")]
    AlgorithmMismatch { kid: String, alg: Algorithm },

    #[error("key '{0}' is already present")]
    DuplicateKid(String),

    #[error("key '{0}' carries no private signing material")]
    NotSigningCapable(String),

    #[error("key '{0}' is not present")]
    UnknownKid(String),

    #[error("no active signing key")]
    NoSigningKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Hmac,
    Rsa,
    Ec,
    Ed,
}

fn family(alg: Algorithm) -> Family {
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Family::Hmac,
        Algorithm::ES256 | Algorithm::ES384 => Family::Ec,
        Algorithm::EdDSA => Family::Ed,
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => Family::Rsa,
    }
}

fn algorithm_of(key_alg: &KeyAlgorithm) -> Option<Algorithm> {
    match key_alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// One trusted key: verification material, optional signing material and a
/// validity window `[not_before, not_after)`.
#[derive(Clone)]
pub struct KeyMaterial {
    kid: KeyId,
    algorithm: Algorithm,
    decoding: DecodingKey,
    encoding: Option<EncodingKey>,
    not_before: DateTime<Utc>,
    not_after: Option<DateTime<Utc>>,
    public_jwk: Option<Jwk>,
}

impl core::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("can_sign", &self.encoding.is_some())
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    /// Shared-secret key (HS256/HS384/HS512). Signs and verifies.
    pub fn hmac(kid: KeyId, algorithm: Algorithm, secret: &[u8]) -> Result<Self, KeyError> {
        if family(algorithm) != Family::Hmac {
            return Err(KeyError::AlgorithmMismatch { kid: kid.to_string(), alg: algorithm });
        }
        if secret.is_empty() {
            return Err(KeyError::Invalid { kid: kid.to_string(), reason: "empty secret".into() });
        }
        Ok(Self {
            kid,
            algorithm,
            decoding: DecodingKey::from_secret(secret),
            encoding: Some(EncodingKey::from_secret(secret)),
            not_before: DateTime::<Utc>::MIN_UTC,
            not_after: None,
            public_jwk: None,
        })
    }

    /// Asymmetric key from PEM. Without `private_pem` the key only verifies.
    pub fn asymmetric_pem(
        kid: KeyId,
        algorithm: Algorithm,
        private_pem: Option<&[u8]>,
        public_pem: &[u8],
    ) -> Result<Self, KeyError> {
        let invalid = |e: jsonwebtoken::errors::Error| KeyError::Invalid {
            kid: kid.to_string(),
            reason: e.to_string(),
        };
        let (decoding, encoding) = match family(algorithm) {
            Family::Rsa => (
                DecodingKey::from_rsa_pem(public_pem).map_err(invalid)?,
                private_pem.map(EncodingKey::from_rsa_pem).transpose().map_err(invalid)?,
            ),
            Family::Ec => (
                DecodingKey::from_ec_pem(public_pem).map_err(invalid)?,
                private_pem.map(EncodingKey::from_ec_pem).transpose().map_err(invalid)?,
            ),
            Family::Ed => (
                DecodingKey::from_ed_pem(public_pem).map_err(invalid)?,
                private_pem.map(EncodingKey::from_ed_pem).transpose().map_err(invalid)?,
            ),
            Family::Hmac => {
                return Err(KeyError::AlgorithmMismatch { kid: kid.to_string(), alg: algorithm });
            }
        };
        Ok(Self {
            kid,
            algorithm,
            decoding,
            encoding,
            not_before: DateTime::<Utc>::MIN_UTC,
            not_after: None,
            public_jwk: None,
        })
    }

    /// Verification-only key discovered from a published JWK.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, KeyError> {
        let kid = jwk
            .common
            .key_id
            .as_deref()
            .map(KeyId::parse)
            .transpose()
            .ok()
            .flatten()
            .ok_or_else(|| KeyError::Invalid {
                kid: String::new(),
                reason: "jwk has no kid".into(),
            })?;
        let algorithm = jwk
            .common
            .key_algorithm
            .as_ref()
            .and_then(algorithm_of)
            .ok_or_else(|| KeyError::Invalid {
                kid: kid.to_string(),
                reason: "jwk has no signature algorithm".into(),
            })?;
        let decoding = DecodingKey::from_jwk(jwk)
            .map_err(|e| KeyError::Invalid { kid: kid.to_string(), reason: e.to_string() })?;
        let public_jwk = (family(algorithm) != Family::Hmac).then(|| jwk.clone());
        Ok(Self {
            kid,
            algorithm,
            decoding,
            encoding: None,
            not_before: DateTime::<Utc>::MIN_UTC,
            not_after: None,
            public_jwk,
        })
    }

    /// Attach the public JWK published for this key. Ignored for HMAC keys.
    pub fn with_public_jwk(mut self, mut jwk: Jwk) -> Self {
        if family(self.algorithm) != Family::Hmac {
            jwk.common.key_id = Some(self.kid.to_string());
            self.public_jwk = Some(jwk);
        }
        self
    }

    pub fn valid_from(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self
    }

    pub fn valid_until(mut self, not_after: DateTime<Utc>) -> Self {
        self.not_after = Some(not_after);
        self
    }

    pub fn kid(&self) -> &KeyId {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn can_sign(&self) -> bool {
        self.encoding.is_some()
    }

    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.not_after
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && self.not_after.is_none_or(|end| now < end)
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    pub fn encoding_key(&self) -> Option<&EncodingKey> {
        self.encoding.as_ref()
    }

    pub fn public_jwk(&self) -> Option<&Jwk> {
        self.public_jwk.as_ref()
    }

    /// Copy of this key with private material dropped and verification
    /// retained until `retain_until`.
    fn retired(&self, retain_until: DateTime<Utc>) -> Self {
        let mut key = self.clone();
        key.encoding = None;
        key.not_after = Some(match key.not_after {
            Some(end) if end < retain_until => end,
            _ => retain_until,
        });
        key
    }
}

/// Resolve a `kid` to verification material trusted at `now`.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, kid: &str, now: DateTime<Utc>) -> Option<Arc<KeyMaterial>>;
}

/// Immutable snapshot of the trusted keys.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<Arc<KeyMaterial>>,
    signing: Option<KeyId>,
}

impl KeySet {
    pub fn get(&self, kid: &str) -> Option<&Arc<KeyMaterial>> {
        self.keys.iter().find(|k| k.kid.as_str() == kid)
    }

    pub fn signing_kid(&self) -> Option<&KeyId> {
        self.signing.as_ref()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Arc<KeyMaterial>> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Rotatable set of trusted keys.
#[derive(Debug)]
pub struct KeyRing {
    current: ArcSwap<KeySet>,
    // Serializes writers; readers never take it.
    write: Mutex<()>,
}

impl KeyRing {
    /// Ring whose only key is also the active signer.
    pub fn new(signing_key: KeyMaterial) -> Result<Self, KeyError> {
        if !signing_key.can_sign() {
            return Err(KeyError::NotSigningCapable(signing_key.kid.to_string()));
        }
        let signing = Some(signing_key.kid.clone());
        Ok(Self::from_set(KeySet { keys: vec![Arc::new(signing_key)], signing }))
    }

    /// Ring that only verifies (downstream services).
    pub fn verification_only(
        keys: impl IntoIterator<Item = KeyMaterial>,
    ) -> Result<Self, KeyError> {
        let mut set = KeySet::default();
        for key in keys {
            if set.get(key.kid.as_str()).is_some() {
                return Err(KeyError::DuplicateKid(key.kid.to_string()));
            }
            set.keys.push(Arc::new(key));
        }
        Ok(Self::from_set(set))
    }

    /// Verification ring built from a JWKS document published by the issuer.
    ///
    /// Entries that cannot be used for signature verification are skipped.
    pub fn from_jwks(jwks: &JwkSet) -> Result<Self, KeyError> {
        let mut keys = Vec::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            match KeyMaterial::from_jwk(jwk) {
                Ok(key) => keys.push(key),
                Err(e) => tracing::warn!(error = %e, "skipping unusable jwk"),
            }
        }
        Self::verification_only(keys)
    }

    fn from_set(set: KeySet) -> Self {
        Self {
            current: ArcSwap::from_pointee(set),
            write: Mutex::new(()),
        }
    }

    /// Lock-free view of the current key set.
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.current.load_full()
    }

    /// The key new tokens are signed with.
    pub fn signing_key(&self, now: DateTime<Utc>) -> Result<Arc<KeyMaterial>, KeyError> {
        let set = self.current.load();
        set.signing
            .as_ref()
            .and_then(|kid| set.get(kid.as_str()))
            .filter(|k| k.can_sign() && k.is_valid_at(now))
            .cloned()
            .ok_or(KeyError::NoSigningKey)
    }

    /// Add a key without changing the signer (e.g. pre-publishing the next key).
    pub fn add(&self, key: KeyMaterial) -> Result<(), KeyError> {
        self.update(|set| {
            if set.get(key.kid.as_str()).is_some() {
                return Err(KeyError::DuplicateKid(key.kid.to_string()));
            }
            set.keys.push(Arc::new(key.clone()));
            Ok(())
        })
    }

    /// Make `new_key` the signer. The previous signer stops signing and keeps
    /// verifying until `retain_until` (at least the longest outstanding token
    /// lifetime), so tokens it already signed stay valid to their own expiry.
    pub fn rotate(
        &self,
        new_key: KeyMaterial,
        retain_until: DateTime<Utc>,
    ) -> Result<(), KeyError> {
        if !new_key.can_sign() {
            return Err(KeyError::NotSigningCapable(new_key.kid.to_string()));
        }
        self.update(|set| {
            if set.get(new_key.kid.as_str()).is_some() {
                return Err(KeyError::DuplicateKid(new_key.kid.to_string()));
            }
            if let Some(old) = set.signing.take() {
                retire_in(set, old.as_str(), retain_until);
            }
            set.keys.push(Arc::new(new_key.clone()));
            set.signing = Some(new_key.kid.clone());
            Ok(())
        })?;
        tracing::info!(kid = %new_key.kid, "signing key rotated");
        Ok(())
    }

    /// Stop trusting `kid` for signing; keep it verifying until `retain_until`.
    pub fn retire(&self, kid: &str, retain_until: DateTime<Utc>) -> Result<(), KeyError> {
        self.update(|set| {
            if set.get(kid).is_none() {
                return Err(KeyError::UnknownKid(kid.to_string()));
            }
            if set.signing.as_ref().is_some_and(|s| s.as_str() == kid) {
                set.signing = None;
            }
            retire_in(set, kid, retain_until);
            Ok(())
        })
    }

    /// Drop keys whose validity window has closed. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        let res = self.update(|set| {
            let before = set.keys.len();
            set.keys.retain(|k| k.not_after.is_none_or(|end| now < end));
            removed = before - set.keys.len();
            if let Some(kid) = set.signing.clone() {
                if set.get(kid.as_str()).is_none() {
                    set.signing = None;
                }
            }
            Ok(())
        });
        if res.is_ok() && removed > 0 {
            tracing::info!(removed, "pruned expired keys");
        }
        removed
    }

    /// Public keys suitable for publication. HMAC secrets are never included.
    pub fn jwks(&self, now: DateTime<Utc>) -> JwkSet {
        let set = self.current.load();
        JwkSet {
            keys: set
                .keys
                .iter()
                .filter(|k| k.is_valid_at(now))
                .filter_map(|k| k.public_jwk.clone())
                .collect(),
        }
    }

    fn update<F>(&self, f: F) -> Result<(), KeyError>
    where
        F: FnOnce(&mut KeySet) -> Result<(), KeyError>,
    {
        let _guard = match self.write.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = KeySet::clone(&self.current.load());
        f(&mut next)?;
        self.current.store(Arc::new(next));
        Ok(())
    }
}

fn retire_in(set: &mut KeySet, kid: &str, retain_until: DateTime<Utc>) {
    for slot in set.keys.iter_mut() {
        if slot.kid.as_str() == kid {
            *slot = Arc::new(slot.retired(retain_until));
        }
    }
}

impl KeyResolver for KeyRing {
    fn resolve(&self, kid: &str, now: DateTime<Utc>) -> Option<Arc<KeyMaterial>> {
        self.current
            .load()
            .get(kid)
            .filter(|k| k.is_valid_at(now))
            .cloned()
    }
}
