//! `trustgate-auth`: pure token trust boundary.
//!
//! Claims, key material, verification and authorization decisions. This crate
//! is intentionally decoupled from HTTP, storage and async runtimes: every
//! function here is synchronous and performs no I/O beyond an in-memory key
//! lookup, so it can run redundantly at the gateway and in every service.

pub mod authority;
pub mod authorize;
pub mod claims;
pub mod keys;
pub mod principal;
pub mod verifier;

pub use authority::{Authority, AuthoritySet};
pub use authorize::{AuthorityRequirement, Decision, Deny, OperationRegistry, authorize};
pub use claims::{TokenClaims, TokenKind, validate_window};
pub use keys::{KeyError, KeyMaterial, KeyResolver, KeyRing, KeySet};
pub use principal::Principal;
pub use verifier::{TokenVerifier, VerifyError, coarse_check};
