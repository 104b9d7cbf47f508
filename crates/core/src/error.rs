//! Error model shared across crates.

use thiserror::Error;

/// Identifier parse/validation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("invalid {0}: {1}")]
    Invalid(&'static str, String),
}

/// Infrastructure failure of a backing store (credential store, client
/// registry, revocation list).
///
/// This is deliberately distinct from "record not found": lookups return
/// `Ok(None)` for an absent record and `Err(StoreError)` only when the store
/// itself could not answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with data that could not be interpreted.
    #[error("store returned corrupt data: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}
