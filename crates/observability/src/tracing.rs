//! Tracing/logging initialization.
//!
//! Ledger services emit structured events (compensation failures, minimum
//! stock warnings, credit limit warnings) through `tracing`; this wires the
//! subscriber that renders them.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process with the default filter.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
}

/// Initialize with an explicit filter, e.g. for tests that want to silence
/// expected compensation errors.
pub fn init_with_filter(filter: EnvFilter) {
    // JSON logs + timestamps, configurable via RUST_LOG.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
