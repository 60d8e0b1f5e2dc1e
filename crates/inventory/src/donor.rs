use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hemobank_core::{Aggregate, AggregateId, AggregateRoot, DomainError, DonorId, FacilityId};
use hemobank_events::Event;
use hemobank_typing::BloodType;

use crate::unit::BloodUnitId;

/// Donor-record stream identifier.
///
/// Derived deterministically from the donor identity so every unit intake
/// for one donor serializes on the same stream; the optimistic append is
/// what makes the first-donation type establishment race-free.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DonorRecordId(pub AggregateId);

impl DonorRecordId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_donor(donor_id: DonorId) -> Self {
        Self(AggregateId::from_uuid(*donor_id.as_uuid()))
    }
}

impl core::fmt::Display for DonorRecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: DonorRecord.
///
/// A donor's blood type is established by their first recorded donation and
/// is immutable thereafter; a later unit carrying a different type is a hard
/// validation error, not a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonorRecord {
    id: DonorRecordId,
    facility_id: Option<FacilityId>,
    donor_id: Option<DonorId>,
    established_type: Option<BloodType>,
    donated_units: u32,
    total_donated_ml: u64,
    version: u64,
    created: bool,
}

impl DonorRecord {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: DonorRecordId) -> Self {
        Self {
            id,
            facility_id: None,
            donor_id: None,
            established_type: None,
            donated_units: 0,
            total_donated_ml: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DonorRecordId {
        self.id
    }

    pub fn facility_id(&self) -> Option<FacilityId> {
        self.facility_id
    }

    pub fn established_type(&self) -> Option<BloodType> {
        self.established_type
    }

    pub fn donated_units(&self) -> u32 {
        self.donated_units
    }

    pub fn total_donated_ml(&self) -> u64 {
        self.total_donated_ml
    }
}

impl AggregateRoot for DonorRecord {
    type Id = DonorRecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordDonation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDonation {
    pub facility_id: FacilityId,
    pub donor_id: DonorId,
    pub unit_id: BloodUnitId,
    pub blood_type: BloodType,
    pub volume_ml: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DonorCommand {
    RecordDonation(RecordDonation),
}

/// Event: DonationRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationRecorded {
    pub facility_id: FacilityId,
    pub donor_id: DonorId,
    pub unit_id: BloodUnitId,
    pub blood_type: BloodType,
    pub volume_ml: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DonorEvent {
    DonationRecorded(DonationRecorded),
}

impl Event for DonorEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DonorEvent::DonationRecorded(_) => "inventory.donor.donation_recorded",
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DonorEvent::DonationRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for DonorRecord {
    type Command = DonorCommand;
    type Event = DonorEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DonorEvent::DonationRecorded(e) => {
                self.id = DonorRecordId::for_donor(e.donor_id);
                self.donor_id = Some(e.donor_id);
                if self.facility_id.is_none() {
                    self.facility_id = Some(e.facility_id);
                }
                if self.established_type.is_none() {
                    self.established_type = Some(e.blood_type);
                }
                self.donated_units += 1;
                self.total_donated_ml += u64::from(e.volume_ml);
                self.created = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DonorCommand::RecordDonation(cmd) => self.handle_record(cmd),
        }
    }
}

impl DonorRecord {
    fn ensure_facility(&self, facility_id: FacilityId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.facility_id != Some(facility_id) {
            return Err(DomainError::invariant("facility mismatch"));
        }
        Ok(())
    }

    fn handle_record(&self, cmd: &RecordDonation) -> Result<Vec<DonorEvent>, DomainError> {
        self.ensure_facility(cmd.facility_id)?;

        if cmd.volume_ml == 0 {
            return Err(DomainError::validation("donated volume must be positive"));
        }

        if let Some(established) = self.established_type {
            if established != cmd.blood_type {
                return Err(DomainError::validation(format!(
                    "donor {} has established blood type {established}; \
                     a unit typed {} cannot be recorded",
                    cmd.donor_id, cmd.blood_type
                )));
            }
        }

        Ok(vec![DonorEvent::DonationRecorded(DonationRecorded {
            facility_id: cmd.facility_id,
            donor_id: cmd.donor_id,
            unit_id: cmd.unit_id,
            blood_type: cmd.blood_type,
            volume_ml: cmd.volume_ml,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bt(s: &str) -> BloodType {
        s.parse().unwrap()
    }

    fn record_cmd(donor_id: DonorId, facility_id: FacilityId, blood_type: BloodType) -> RecordDonation {
        RecordDonation {
            facility_id,
            donor_id,
            unit_id: BloodUnitId::new(AggregateId::new()),
            blood_type,
            volume_ml: 450,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn first_donation_establishes_blood_type() {
        let donor_id = DonorId::new();
        let facility_id = FacilityId::new();
        let mut record = DonorRecord::empty(DonorRecordId::for_donor(donor_id));

        let events = record
            .handle(&DonorCommand::RecordDonation(record_cmd(
                donor_id,
                facility_id,
                bt("A+"),
            )))
            .unwrap();
        record.apply(&events[0]);

        assert_eq!(record.established_type(), Some(bt("A+")));
        assert_eq!(record.donated_units(), 1);
        assert_eq!(record.total_donated_ml(), 450);
    }

    #[test]
    fn mismatched_type_on_later_donation_is_rejected() {
        let donor_id = DonorId::new();
        let facility_id = FacilityId::new();
        let mut record = DonorRecord::empty(DonorRecordId::for_donor(donor_id));

        let events = record
            .handle(&DonorCommand::RecordDonation(record_cmd(
                donor_id,
                facility_id,
                bt("A+"),
            )))
            .unwrap();
        record.apply(&events[0]);

        let err = record
            .handle(&DonorCommand::RecordDonation(record_cmd(
                donor_id,
                facility_id,
                bt("B-"),
            )))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(record.established_type(), Some(bt("A+")));
    }

    #[test]
    fn matching_type_on_later_donation_accumulates() {
        let donor_id = DonorId::new();
        let facility_id = FacilityId::new();
        let mut record = DonorRecord::empty(DonorRecordId::for_donor(donor_id));

        for _ in 0..3 {
            hemobank_events::execute(
                &mut record,
                &DonorCommand::RecordDonation(record_cmd(donor_id, facility_id, bt("O-"))),
            )
            .unwrap();
        }

        assert_eq!(record.donated_units(), 3);
        assert_eq!(record.total_donated_ml(), 1350);
    }

    #[test]
    fn donor_record_id_is_stable_per_donor() {
        let donor_id = DonorId::new();
        assert_eq!(
            DonorRecordId::for_donor(donor_id),
            DonorRecordId::for_donor(donor_id)
        );
    }
}
