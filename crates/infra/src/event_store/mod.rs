//! Append-only event store boundary.
//!
//! Infrastructure-facing abstraction for storing and loading facility-scoped
//! event streams without making storage assumptions. The external
//! transactional store plugs in behind [`EventStore`]; the in-memory
//! implementation serves tests and embedded deployments.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
