//! `hemobank-inventory` — the blood-unit ledger.
//!
//! Owns the `BloodUnit` lifecycle (collection, component separation, volume
//! accounting, status) and the per-donor record that pins a donor's blood
//! type on first donation.

pub mod donor;
pub mod unit;

pub use donor::{
    DonationRecorded, DonorCommand, DonorEvent, DonorRecord, DonorRecordId, RecordDonation,
};
pub use unit::{
    BloodUnit, BloodUnitCommand, BloodUnitEvent, BloodUnitId, CollectWholeBlood,
    ComponentRegistered, ComponentSpec, ComponentsSeparated, DeductVolume, RegisterComponent,
    RestoreVolume, SeparateComponents, SeparationPlan, UnitStatus, UnitStatusUpdated,
    UpdateUnitStatus, VolumeDeducted, VolumeRestored, WholeBloodCollected,
};
