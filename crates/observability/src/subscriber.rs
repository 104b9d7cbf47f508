//! Tracing/logging initialization.
//!
//! JSON lines in production, compact human output under test. Both read
//! `RUST_LOG` and fall back to [`DEFAULT_DIRECTIVES`]. Token values, secrets
//! and hashes are never recorded as fields anywhere in the workspace.

use tracing_subscriber::EnvFilter;

/// `info` for our crates, quieter HTTP plumbing.
pub const DEFAULT_DIRECTIVES: &str = "info,hyper=warn,reqwest=warn";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Initialize tracing for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_current_span(false)
        .try_init();
}

/// Initialize tracing routed through the test harness's captured output.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .compact()
        .try_init();
}
