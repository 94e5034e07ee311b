//! Tracing initialization shared by binaries and tests.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing-subscriber` fmt layer driven by `RUST_LOG`, defaulting
/// to `info`. Safe to call more than once (e.g. from multiple test modules);
/// later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
