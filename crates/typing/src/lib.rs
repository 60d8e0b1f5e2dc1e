//! `hemobank-typing` — blood typing value objects and the transfusion
//! compatibility resolver.
//!
//! Pure functions over closed enumerations; no state, no IO, no errors.

pub mod blood_type;
pub mod compatibility;

pub use blood_type::{BloodGroup, BloodType, ComponentType, RhFactor};
pub use compatibility::{
    compatible_donors, compatible_donors_for_plasma, compatible_donors_for_platelets,
    compatible_donors_for_whole_blood, plasma_donates, whole_blood_donates, PlateletPolicy,
};
