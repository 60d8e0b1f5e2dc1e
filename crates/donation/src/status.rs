//! Donation status and its transition table.
//!
//! The table below is the single source of truth for reachable states.
//! Every command handler funnels through [`ensure_transition`]; there are no
//! per-operation copies of these edges anywhere else.

use serde::{Deserialize, Serialize};

use hemobank_core::{DomainError, DomainResult};

/// Lifecycle status of a campaign donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Pending,
    AppointmentConfirmed,
    CustomerCheckedIn,
    Completed,
    ResultReturned,
    AppointmentCancelled,
    AppointmentAbsent,
    CustomerCancelled,
    Rejected,
}

impl core::fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DonationStatus::Pending => "pending",
            DonationStatus::AppointmentConfirmed => "appointment_confirmed",
            DonationStatus::CustomerCheckedIn => "customer_checked_in",
            DonationStatus::Completed => "completed",
            DonationStatus::ResultReturned => "result_returned",
            DonationStatus::AppointmentCancelled => "appointment_cancelled",
            DonationStatus::AppointmentAbsent => "appointment_absent",
            DonationStatus::CustomerCancelled => "customer_cancelled",
            DonationStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Targets reachable from `from`. Terminal states map to an empty slice.
pub const fn allowed_targets(from: DonationStatus) -> &'static [DonationStatus] {
    use DonationStatus::*;
    match from {
        Pending => &[Rejected, AppointmentConfirmed, CustomerCancelled],
        AppointmentConfirmed => &[
            AppointmentCancelled,
            AppointmentAbsent,
            Completed,
            CustomerCancelled,
            CustomerCheckedIn,
        ],
        CustomerCheckedIn => &[Completed],
        Completed => &[ResultReturned],
        ResultReturned | AppointmentCancelled | AppointmentAbsent | CustomerCancelled
        | Rejected => &[],
    }
}

pub fn transition_allowed(from: DonationStatus, to: DonationStatus) -> bool {
    allowed_targets(from).contains(&to)
}

pub fn is_terminal(status: DonationStatus) -> bool {
    allowed_targets(status).is_empty()
}

/// Reject any edge absent from the table, including `from == to`.
pub fn ensure_transition(from: DonationStatus, to: DonationStatus) -> DomainResult<()> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(DomainError::invalid_transition(from, to))
    }
}
