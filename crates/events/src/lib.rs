//! `hemobank-events` — event and pub/sub abstractions.
//!
//! The append-only event stream is the system's authoritative history; the
//! audit trails callers see are materialized from it by projections.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
