//! Facility-isolated read model storage abstractions.

pub mod facility_store;

pub use facility_store::{FacilityStore, InMemoryFacilityStore};
