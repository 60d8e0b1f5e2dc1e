//! Infrastructure layer: event store, command dispatch, read models,
//! projections, application services, background workers.
//!
//! Everything here composes the domain crates through traits; swapping the
//! in-memory store/bus for a transactional backend changes no domain code.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod services;
pub mod workers;

#[cfg(test)]
mod integration_tests;
