//! Observability wiring for hemobank processes.

pub mod tracing;

pub use tracing::{init, init_with};
