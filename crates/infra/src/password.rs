//! Argon2 hashing for user passwords and client secrets.

use std::sync::OnceLock;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("secret hashing failed: {0}")]
pub struct HashError(String);

/// Hash `plain` into a PHC string (salt and parameters embedded).
pub fn hash_secret(plain: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| HashError(e.to_string()))
}

/// Constant-time check of `plain` against a PHC hash. A malformed hash never
/// verifies.
pub fn verify_secret(plain: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

/// Hash with the same parameters as real secrets, generated once per process.
fn dummy_hash() -> Option<&'static str> {
    DUMMY_HASH
        .get_or_init(|| hash_secret("trustgate-absent-account").ok())
        .as_deref()
}

/// Full-cost verification against a throwaway hash, for lookups that found
/// no account. Always `false`; an absent account must cost as much as a
/// wrong password.
pub fn verify_absent(plain: &str) -> bool {
    if let Some(hash) = dummy_hash() {
        let _ = verify_secret(plain, hash);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_only_the_original() {
        let hash = hash_secret("password").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_secret("password", &hash));
        assert!(!verify_secret("Password", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        assert_ne!(hash_secret("same").unwrap(), hash_secret("same").unwrap());
    }

    #[test]
    fn malformed_hash_is_rejected() {
        assert!(!verify_secret("password", "not-a-phc-string"));
    }

    #[test]
    fn absent_account_runs_a_real_verification() {
        assert!(!verify_absent("password"));
        let hash = dummy_hash().unwrap();
        let parsed = PasswordHash::new(hash).unwrap();
        assert_eq!(parsed.algorithm.as_str(), "argon2id");
        assert_eq!(hash_secret("x").unwrap().split('$').nth(3), hash.split('$').nth(3));
    }
}
