//! The acting party behind a state change.

use serde::{Deserialize, Serialize};

use crate::id::{DonorId, StaffId};

/// Who performed an operation.
///
/// Workflow rules differentiate staff actions from a donor acting on their
/// own record (e.g. self-cancellation of an appointment). Authentication and
/// role checks happen outside the core; callers pass the resolved identity in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Staff(StaffId),
    Donor(DonorId),
}

impl Actor {
    pub fn is_staff(&self) -> bool {
        matches!(self, Actor::Staff(_))
    }

    pub fn is_donor(&self) -> bool {
        matches!(self, Actor::Donor(_))
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Actor::Staff(id) => write!(f, "staff:{id}"),
            Actor::Donor(id) => write!(f, "donor:{id}"),
        }
    }
}
