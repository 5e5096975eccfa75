//! Utilities for logging.

use tracing_subscriber::EnvFilter;

/// Initialize a global subscriber suitable for tests.
///
/// Respects `RUST_LOG`, defaults to `debug`. Safe to call from multiple
/// tests; only the first call installs the subscriber.
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Initialize a global subscriber for binaries embedding this crate.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
