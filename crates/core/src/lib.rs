//! `trustgate-core`: identifiers, time and infrastructure errors shared by
//! every other crate.
//!
//! This crate contains no I/O.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{IdError, StoreError};
pub use id::{ClientId, KeyId, Subject, TokenId};
