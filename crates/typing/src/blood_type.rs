use core::str::FromStr;
use serde::{Deserialize, Serialize};

use hemobank_core::DomainError;

/// ABO blood group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BloodGroup {
    A,
    B,
    Ab,
    O,
}

/// Rhesus factor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RhFactor {
    Positive,
    Negative,
}

/// ABO group + Rh factor, used as a composite key throughout the ledger.
///
/// A pure value: two instances with the same group and factor are the same
/// blood type, so it is `Copy` and compared structurally everywhere.
/// Immutable in the domain sense too: a donor's blood type is established
/// on first donation and every later unit must carry the same value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BloodType {
    pub group: BloodGroup,
    pub rh: RhFactor,
}

impl BloodType {
    pub const fn new(group: BloodGroup, rh: RhFactor) -> Self {
        Self { group, rh }
    }

    /// All eight ABO/Rh combinations.
    pub const ALL: [BloodType; 8] = [
        BloodType::new(BloodGroup::A, RhFactor::Positive),
        BloodType::new(BloodGroup::A, RhFactor::Negative),
        BloodType::new(BloodGroup::B, RhFactor::Positive),
        BloodType::new(BloodGroup::B, RhFactor::Negative),
        BloodType::new(BloodGroup::Ab, RhFactor::Positive),
        BloodType::new(BloodGroup::Ab, RhFactor::Negative),
        BloodType::new(BloodGroup::O, RhFactor::Positive),
        BloodType::new(BloodGroup::O, RhFactor::Negative),
    ];
}

impl core::fmt::Display for BloodGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            BloodGroup::A => "A",
            BloodGroup::B => "B",
            BloodGroup::Ab => "AB",
            BloodGroup::O => "O",
        };
        f.write_str(s)
    }
}

impl core::fmt::Display for RhFactor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            RhFactor::Positive => "+",
            RhFactor::Negative => "-",
        };
        f.write_str(s)
    }
}

impl core::fmt::Display for BloodType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}{}", self.group, self.rh)
    }
}

impl FromStr for BloodType {
    type Err = DomainError;

    /// Parse "A+", "AB-", "o+" etc. Malformed input is rejected here so the
    /// resolver itself never sees it.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (group_str, rh_str) = s
            .split_at_checked(s.len().saturating_sub(1))
            .ok_or_else(|| DomainError::validation(format!("malformed blood type: {s:?}")))?;

        let group = match group_str.to_ascii_uppercase().as_str() {
            "A" => BloodGroup::A,
            "B" => BloodGroup::B,
            "AB" => BloodGroup::Ab,
            "O" => BloodGroup::O,
            other => {
                return Err(DomainError::validation(format!(
                    "unknown blood group: {other:?}"
                )));
            }
        };
        let rh = match rh_str {
            "+" => RhFactor::Positive,
            "-" => RhFactor::Negative,
            other => {
                return Err(DomainError::validation(format!(
                    "unknown rh factor: {other:?}"
                )));
            }
        };

        Ok(BloodType { group, rh })
    }
}

/// What a blood unit physically is: unseparated whole blood, or one of the
/// components derived from it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    WholeBlood,
    RedCells,
    Plasma,
    Platelets,
}

impl core::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ComponentType::WholeBlood => "whole_blood",
            ComponentType::RedCells => "red_cells",
            ComponentType::Plasma => "plasma",
            ComponentType::Platelets => "platelets",
        };
        f.write_str(s)
    }
}
