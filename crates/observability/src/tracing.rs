//! Tracing/logging initialization.
//!
//! Can grow layered logging, correlation IDs, and per-facility fields as
//! operational needs appear.

use tracing_subscriber::EnvFilter;

/// Initialize JSON logging for the process, filtered via `RUST_LOG`
/// (default level: `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
}

/// Initialize with an explicit filter (tests, embedded tooling).
pub fn init_with(filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
