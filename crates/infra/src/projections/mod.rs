//! Projection implementations (read model builders).
//!
//! Projections consume published domain events and build query-optimized
//! read models: the current-state unit ledger, the three audit trails, the
//! donation results, and the emergency request board. All of them are:
//! - **Rebuildable**: reconstructed from the event stream at any time
//! - **Facility-isolated**: data partitioned by facility
//! - **Idempotent**: safe under at-least-once delivery

pub mod donation_log;
pub mod donation_results;
pub mod emergency_board;
pub mod emergency_log;
pub mod unit_actions;
pub mod unit_ledger;

pub use donation_log::{CampaignDonationLog, DonationLogEntry, DonationLogProjection};
pub use donation_results::{DonationResultReadModel, DonationResultsProjection};
pub use emergency_board::{EmergencyBoardProjection, RequestReadModel};
pub use emergency_log::{EmergencyLogEntry, EmergencyLogProjection, EmergencyRequestLog};
pub use unit_actions::{BloodUnitAction, UnitActionKind, UnitActionLog, UnitActionsProjection};
pub use unit_ledger::{UnitLedgerProjection, UnitReadModel};
