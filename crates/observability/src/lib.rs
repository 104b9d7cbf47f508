//! Process-wide tracing setup.

pub mod subscriber;

pub use subscriber::{DEFAULT_DIRECTIVES, init, init_for_tests};
