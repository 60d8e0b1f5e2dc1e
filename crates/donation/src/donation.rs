use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use hemobank_core::{
    Actor, Aggregate, AggregateId, AggregateRoot, DomainError, DonorId, FacilityId,
};
use hemobank_events::Event;
use hemobank_typing::BloodType;

use crate::status::{ensure_transition, DonationStatus};

/// Minimum notice a donor must give to cancel a confirmed appointment.
const CANCELLATION_NOTICE_HOURS: i64 = 24;

/// Campaign donation identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DonationId(pub AggregateId);

impl DonationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DonationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of the campaign a donation belongs to. Campaign content
/// management lives outside the core; only the identity and the fixed
/// collection day (snapshotted at submission) matter here.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub AggregateId);

impl CampaignId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CampaignId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Outcome classification of a completed donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    NotQualified,
}

/// The 1:1 result recorded when a donation completes.
///
/// Immutable except through the staff correction command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationResult {
    pub volume_ml: u32,
    pub blood_type: BloodType,
    pub status: ResultStatus,
    pub reject_reason: Option<String>,
}

impl DonationResult {
    fn validate(&self) -> Result<(), DomainError> {
        match self.status {
            ResultStatus::Completed => {
                if self.volume_ml == 0 {
                    return Err(DomainError::validation(
                        "a completed donation must record a positive volume",
                    ));
                }
                if self.reject_reason.is_some() {
                    return Err(DomainError::validation(
                        "a completed donation cannot carry a reject reason",
                    ));
                }
            }
            ResultStatus::NotQualified => {
                if self.reject_reason.as_deref().is_none_or(str::is_empty) {
                    return Err(DomainError::validation(
                        "a not-qualified result must state the reject reason",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Aggregate root: CampaignDonation.
///
/// One donor's participation in one campaign, from submission through the
/// returned result (or one of the cancellation/rejection exits).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignDonation {
    id: DonationId,
    facility_id: Option<FacilityId>,
    donor_id: Option<DonorId>,
    campaign_id: Option<CampaignId>,
    status: DonationStatus,
    appointment_at: Option<DateTime<Utc>>,
    campaign_day: Option<NaiveDate>,
    result: Option<DonationResult>,
    version: u64,
    created: bool,
}

impl CampaignDonation {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: DonationId) -> Self {
        Self {
            id,
            facility_id: None,
            donor_id: None,
            campaign_id: None,
            status: DonationStatus::Pending,
            appointment_at: None,
            campaign_day: None,
            result: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DonationId {
        self.id
    }

    pub fn facility_id(&self) -> Option<FacilityId> {
        self.facility_id
    }

    pub fn donor_id(&self) -> Option<DonorId> {
        self.donor_id
    }

    pub fn campaign_id(&self) -> Option<CampaignId> {
        self.campaign_id
    }

    pub fn status(&self) -> DonationStatus {
        self.status
    }

    pub fn appointment_at(&self) -> Option<DateTime<Utc>> {
        self.appointment_at
    }

    pub fn campaign_day(&self) -> Option<NaiveDate> {
        self.campaign_day
    }

    pub fn result(&self) -> Option<&DonationResult> {
        self.result.as_ref()
    }

    /// Volume collected, once a result exists.
    pub fn volume_ml(&self) -> Option<u32> {
        self.result.as_ref().map(|r| r.volume_ml)
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for CampaignDonation {
    type Id = DonationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SubmitDonation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitDonation {
    pub facility_id: FacilityId,
    pub donation_id: DonationId,
    pub donor_id: DonorId,
    pub campaign_id: CampaignId,
    /// The campaign's fixed collection day, when it has one. Snapshotted
    /// here so appointment validation stays local to this aggregate.
    pub campaign_day: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionDonation (generic status move along the table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDonation {
    pub facility_id: FacilityId,
    pub donation_id: DonationId,
    pub target: DonationStatus,
    pub actor: Actor,
    pub note: Option<String>,
    /// Required when confirming an appointment; rejected otherwise.
    pub appointment_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteDonation (transition into Completed + record the result).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteDonation {
    pub facility_id: FacilityId,
    pub donation_id: DonationId,
    pub actor: Actor,
    pub note: Option<String>,
    pub result: DonationResult,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CorrectResult (staff correction of a recorded result).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectResult {
    pub facility_id: FacilityId,
    pub donation_id: DonationId,
    pub actor: Actor,
    pub result: DonationResult,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DonationCommand {
    SubmitDonation(SubmitDonation),
    TransitionDonation(TransitionDonation),
    CompleteDonation(CompleteDonation),
    CorrectResult(CorrectResult),
}

/// Event: DonationSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationSubmitted {
    pub facility_id: FacilityId,
    pub donation_id: DonationId,
    pub donor_id: DonorId,
    pub campaign_id: CampaignId,
    pub campaign_day: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DonationStatusChanged (one per transition, with actor and note).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationStatusChanged {
    pub facility_id: FacilityId,
    pub donation_id: DonationId,
    pub previous: DonationStatus,
    pub new: DonationStatus,
    pub actor: Actor,
    pub note: Option<String>,
    pub appointment_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DonationResultRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationResultRecorded {
    pub facility_id: FacilityId,
    pub donation_id: DonationId,
    pub result: DonationResult,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DonationResultCorrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationResultCorrected {
    pub facility_id: FacilityId,
    pub donation_id: DonationId,
    pub result: DonationResult,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DonationEvent {
    DonationSubmitted(DonationSubmitted),
    DonationStatusChanged(DonationStatusChanged),
    DonationResultRecorded(DonationResultRecorded),
    DonationResultCorrected(DonationResultCorrected),
}

impl Event for DonationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DonationEvent::DonationSubmitted(_) => "donation.campaign_donation.submitted",
            DonationEvent::DonationStatusChanged(_) => "donation.campaign_donation.status_changed",
            DonationEvent::DonationResultRecorded(_) => "donation.campaign_donation.result_recorded",
            DonationEvent::DonationResultCorrected(_) => {
                "donation.campaign_donation.result_corrected"
            }
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DonationEvent::DonationSubmitted(e) => e.occurred_at,
            DonationEvent::DonationStatusChanged(e) => e.occurred_at,
            DonationEvent::DonationResultRecorded(e) => e.occurred_at,
            DonationEvent::DonationResultCorrected(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CampaignDonation {
    type Command = DonationCommand;
    type Event = DonationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DonationEvent::DonationSubmitted(e) => {
                self.id = e.donation_id;
                self.facility_id = Some(e.facility_id);
                self.donor_id = Some(e.donor_id);
                self.campaign_id = Some(e.campaign_id);
                self.campaign_day = e.campaign_day;
                self.status = DonationStatus::Pending;
                self.created = true;
            }
            DonationEvent::DonationStatusChanged(e) => {
                self.status = e.new;
                if e.appointment_at.is_some() {
                    self.appointment_at = e.appointment_at;
                }
            }
            DonationEvent::DonationResultRecorded(e) => {
                self.result = Some(e.result.clone());
            }
            DonationEvent::DonationResultCorrected(e) => {
                self.result = Some(e.result.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DonationCommand::SubmitDonation(cmd) => self.handle_submit(cmd),
            DonationCommand::TransitionDonation(cmd) => self.handle_transition(cmd),
            DonationCommand::CompleteDonation(cmd) => self.handle_complete(cmd),
            DonationCommand::CorrectResult(cmd) => self.handle_correct(cmd),
        }
    }
}

impl CampaignDonation {
    fn ensure_facility(&self, facility_id: FacilityId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.facility_id != Some(facility_id) {
            return Err(DomainError::invariant("facility mismatch"));
        }
        Ok(())
    }

    fn ensure_donation_id(&self, donation_id: DonationId) -> Result<(), DomainError> {
        if self.id != donation_id {
            return Err(DomainError::invariant("donation_id mismatch"));
        }
        Ok(())
    }

    fn handle_submit(&self, cmd: &SubmitDonation) -> Result<Vec<DonationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("donation already exists"));
        }

        Ok(vec![DonationEvent::DonationSubmitted(DonationSubmitted {
            facility_id: cmd.facility_id,
            donation_id: cmd.donation_id,
            donor_id: cmd.donor_id,
            campaign_id: cmd.campaign_id,
            campaign_day: cmd.campaign_day,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(
        &self,
        cmd: &TransitionDonation,
    ) -> Result<Vec<DonationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_facility(cmd.facility_id)?;
        self.ensure_donation_id(cmd.donation_id)?;

        if cmd.target == DonationStatus::Completed {
            return Err(DomainError::validation(
                "completing a donation must record its result",
            ));
        }

        ensure_transition(self.status, cmd.target)?;

        match cmd.target {
            DonationStatus::AppointmentConfirmed => {
                let appointment_at = cmd.appointment_at.ok_or_else(|| {
                    DomainError::validation("confirmation requires an appointment date")
                })?;
                if let Some(day) = self.campaign_day {
                    if appointment_at.date_naive() != day {
                        return Err(DomainError::validation(format!(
                            "appointment must fall on the campaign collection day ({day})"
                        )));
                    }
                }
            }
            _ => {
                if cmd.appointment_at.is_some() {
                    return Err(DomainError::validation(
                        "an appointment date can only be set when confirming",
                    ));
                }
            }
        }

        // A donor backing out of a confirmed appointment must give notice.
        if cmd.target == DonationStatus::CustomerCancelled
            && self.status == DonationStatus::AppointmentConfirmed
            && cmd.actor.is_donor()
        {
            let appointment_at = self
                .appointment_at
                .ok_or_else(|| DomainError::invariant("confirmed donation has no appointment"))?;
            if appointment_at - cmd.occurred_at < Duration::hours(CANCELLATION_NOTICE_HOURS) {
                return Err(DomainError::validation(format!(
                    "cancellation window expired: appointments require at least \
                     {CANCELLATION_NOTICE_HOURS} hours notice"
                )));
            }
        }

        Ok(vec![DonationEvent::DonationStatusChanged(
            DonationStatusChanged {
                facility_id: cmd.facility_id,
                donation_id: cmd.donation_id,
                previous: self.status,
                new: cmd.target,
                actor: cmd.actor,
                note: cmd.note.clone(),
                appointment_at: cmd.appointment_at,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_complete(&self, cmd: &CompleteDonation) -> Result<Vec<DonationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_facility(cmd.facility_id)?;
        self.ensure_donation_id(cmd.donation_id)?;

        ensure_transition(self.status, DonationStatus::Completed)?;
        cmd.result.validate()?;

        // Status change and result are one atomic append; Completed is
        // reachable exactly once, so exactly one result can ever exist.
        Ok(vec![
            DonationEvent::DonationStatusChanged(DonationStatusChanged {
                facility_id: cmd.facility_id,
                donation_id: cmd.donation_id,
                previous: self.status,
                new: DonationStatus::Completed,
                actor: cmd.actor,
                note: cmd.note.clone(),
                appointment_at: None,
                occurred_at: cmd.occurred_at,
            }),
            DonationEvent::DonationResultRecorded(DonationResultRecorded {
                facility_id: cmd.facility_id,
                donation_id: cmd.donation_id,
                result: cmd.result.clone(),
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_correct(&self, cmd: &CorrectResult) -> Result<Vec<DonationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_facility(cmd.facility_id)?;
        self.ensure_donation_id(cmd.donation_id)?;

        if self.result.is_none() {
            return Err(DomainError::conflict(
                "no donation result has been recorded yet",
            ));
        }
        cmd.result.validate()?;

        Ok(vec![DonationEvent::DonationResultCorrected(
            DonationResultCorrected {
                facility_id: cmd.facility_id,
                donation_id: cmd.donation_id,
                result: cmd.result.clone(),
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{allowed_targets, transition_allowed};
    use hemobank_core::StaffId;
    use proptest::prelude::*;

    fn bt(s: &str) -> BloodType {
        s.parse().unwrap()
    }

    fn staff() -> Actor {
        Actor::Staff(StaffId::new())
    }

    fn ok_result() -> DonationResult {
        DonationResult {
            volume_ml: 450,
            blood_type: bt("O+"),
            status: ResultStatus::Completed,
            reject_reason: None,
        }
    }

    struct Fixture {
        donation: CampaignDonation,
        facility_id: FacilityId,
        donation_id: DonationId,
        donor_id: DonorId,
        now: DateTime<Utc>,
    }

    fn submitted(campaign_day: Option<NaiveDate>) -> Fixture {
        let facility_id = FacilityId::new();
        let donation_id = DonationId::new(AggregateId::new());
        let donor_id = DonorId::new();
        let now = Utc::now();
        let mut donation = CampaignDonation::empty(donation_id);

        let events = donation
            .handle(&DonationCommand::SubmitDonation(SubmitDonation {
                facility_id,
                donation_id,
                donor_id,
                campaign_id: CampaignId::new(AggregateId::new()),
                campaign_day,
                occurred_at: now,
            }))
            .unwrap();
        donation.apply(&events[0]);

        Fixture {
            donation,
            facility_id,
            donation_id,
            donor_id,
            now,
        }
    }

    fn transition(
        f: &mut Fixture,
        target: DonationStatus,
        actor: Actor,
        appointment_at: Option<DateTime<Utc>>,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let events = f
            .donation
            .handle(&DonationCommand::TransitionDonation(TransitionDonation {
                facility_id: f.facility_id,
                donation_id: f.donation_id,
                target,
                actor,
                note: None,
                appointment_at,
                occurred_at,
            }))?;
        for e in &events {
            f.donation.apply(e);
        }
        Ok(())
    }

    #[test]
    fn full_lifecycle_to_result_returned() {
        let mut f = submitted(None);
        let appt = f.now + Duration::days(3);
        let now = f.now;

        transition(
            &mut f,
            DonationStatus::AppointmentConfirmed,
            staff(),
            Some(appt),
            now,
        )
        .unwrap();
        assert_eq!(f.donation.appointment_at(), Some(appt));

        transition(&mut f, DonationStatus::CustomerCheckedIn, staff(), None, appt).unwrap();

        let events = f
            .donation
            .handle(&DonationCommand::CompleteDonation(CompleteDonation {
                facility_id: f.facility_id,
                donation_id: f.donation_id,
                actor: staff(),
                note: None,
                result: ok_result(),
                occurred_at: appt,
            }))
            .unwrap();
        assert_eq!(events.len(), 2);
        for e in &events {
            f.donation.apply(e);
        }
        assert_eq!(f.donation.status(), DonationStatus::Completed);
        assert_eq!(f.donation.volume_ml(), Some(450));

        transition(&mut f, DonationStatus::ResultReturned, staff(), None, appt).unwrap();
        assert_eq!(f.donation.status(), DonationStatus::ResultReturned);
    }

    #[test]
    fn edges_absent_from_the_table_are_rejected() {
        let mut f = submitted(None);
        let now = f.now;
        let err = transition(&mut f, DonationStatus::CustomerCheckedIn, staff(), None, now)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn resetting_the_current_status_is_rejected() {
        let mut f = submitted(None);
        let now = f.now;
        let err =
            transition(&mut f, DonationStatus::Pending, staff(), None, now).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn generic_transition_cannot_reach_completed() {
        let mut f = submitted(None);
        let appt = f.now + Duration::days(2);
        let now = f.now;
        transition(
            &mut f,
            DonationStatus::AppointmentConfirmed,
            staff(),
            Some(appt),
            now,
        )
        .unwrap();

        let err = transition(&mut f, DonationStatus::Completed, staff(), None, appt).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn confirmation_requires_an_appointment_date() {
        let mut f = submitted(None);
        let now = f.now;
        let err = transition(
            &mut f,
            DonationStatus::AppointmentConfirmed,
            staff(),
            None,
            now,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn appointment_must_fall_on_the_campaign_day() {
        let day = (Utc::now() + Duration::days(5)).date_naive();
        let mut f = submitted(Some(day));

        let off_day = f.now + Duration::days(6);
        let now = f.now;
        let err = transition(
            &mut f,
            DonationStatus::AppointmentConfirmed,
            staff(),
            Some(off_day),
            now,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let on_day = day.and_hms_opt(9, 30, 0).unwrap().and_utc();
        let now = f.now;
        transition(
            &mut f,
            DonationStatus::AppointmentConfirmed,
            staff(),
            Some(on_day),
            now,
        )
        .unwrap();
        assert_eq!(f.donation.status(), DonationStatus::AppointmentConfirmed);
    }

    #[test]
    fn donor_cancellation_needs_24_hours_notice() {
        let mut f = submitted(None);
        let appt = f.now + Duration::hours(10);
        let now = f.now;
        transition(
            &mut f,
            DonationStatus::AppointmentConfirmed,
            staff(),
            Some(appt),
            now,
        )
        .unwrap();

        let donor = Actor::Donor(f.donor_id);
        let now = f.now;
        let err = transition(&mut f, DonationStatus::CustomerCancelled, donor, None, now)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(f.donation.status(), DonationStatus::AppointmentConfirmed);
    }

    #[test]
    fn donor_cancellation_with_enough_notice_succeeds() {
        let mut f = submitted(None);
        let appt = f.now + Duration::hours(30);
        let now = f.now;
        transition(
            &mut f,
            DonationStatus::AppointmentConfirmed,
            staff(),
            Some(appt),
            now,
        )
        .unwrap();

        let donor = Actor::Donor(f.donor_id);
        let now = f.now;
        transition(&mut f, DonationStatus::CustomerCancelled, donor, None, now).unwrap();
        assert_eq!(f.donation.status(), DonationStatus::CustomerCancelled);
    }

    #[test]
    fn staff_cancellation_ignores_the_notice_window() {
        let mut f = submitted(None);
        let appt = f.now + Duration::hours(2);
        let now = f.now;
        transition(
            &mut f,
            DonationStatus::AppointmentConfirmed,
            staff(),
            Some(appt),
            now,
        )
        .unwrap();

        let now = f.now;
        transition(
            &mut f,
            DonationStatus::AppointmentCancelled,
            staff(),
            None,
            now,
        )
        .unwrap();
        assert_eq!(f.donation.status(), DonationStatus::AppointmentCancelled);
    }

    #[test]
    fn completion_records_exactly_one_result() {
        let mut f = submitted(None);
        let appt = f.now + Duration::days(1);
        let now = f.now;
        transition(
            &mut f,
            DonationStatus::AppointmentConfirmed,
            staff(),
            Some(appt),
            now,
        )
        .unwrap();

        let complete = DonationCommand::CompleteDonation(CompleteDonation {
            facility_id: f.facility_id,
            donation_id: f.donation_id,
            actor: staff(),
            note: None,
            result: ok_result(),
            occurred_at: appt,
        });
        let events = f.donation.handle(&complete).unwrap();
        for e in &events {
            f.donation.apply(e);
        }
        assert!(f.donation.result().is_some());

        // Completed is terminal for completion; a second attempt cannot
        // produce a second result.
        let err = f.donation.handle(&complete).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn not_qualified_result_requires_a_reason() {
        let mut f = submitted(None);
        let appt = f.now + Duration::days(1);
        let now = f.now;
        transition(
            &mut f,
            DonationStatus::AppointmentConfirmed,
            staff(),
            Some(appt),
            now,
        )
        .unwrap();

        let err = f
            .donation
            .handle(&DonationCommand::CompleteDonation(CompleteDonation {
                facility_id: f.facility_id,
                donation_id: f.donation_id,
                actor: staff(),
                note: None,
                result: DonationResult {
                    volume_ml: 0,
                    blood_type: bt("A+"),
                    status: ResultStatus::NotQualified,
                    reject_reason: None,
                },
                occurred_at: appt,
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn result_correction_only_after_a_result_exists() {
        let mut f = submitted(None);
        let correct = DonationCommand::CorrectResult(CorrectResult {
            facility_id: f.facility_id,
            donation_id: f.donation_id,
            actor: staff(),
            result: ok_result(),
            occurred_at: f.now,
        });

        let err = f.donation.handle(&correct).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let appt = f.now + Duration::days(1);
        let now = f.now;
        transition(
            &mut f,
            DonationStatus::AppointmentConfirmed,
            staff(),
            Some(appt),
            now,
        )
        .unwrap();
        let events = f
            .donation
            .handle(&DonationCommand::CompleteDonation(CompleteDonation {
                facility_id: f.facility_id,
                donation_id: f.donation_id,
                actor: staff(),
                note: None,
                result: ok_result(),
                occurred_at: appt,
            }))
            .unwrap();
        for e in &events {
            f.donation.apply(e);
        }

        let events = f.donation.handle(&correct).unwrap();
        for e in &events {
            f.donation.apply(e);
        }
        assert_eq!(f.donation.result().unwrap().volume_ml, 450);
    }

    const ALL_STATUSES: [DonationStatus; 9] = [
        DonationStatus::Pending,
        DonationStatus::AppointmentConfirmed,
        DonationStatus::CustomerCheckedIn,
        DonationStatus::Completed,
        DonationStatus::ResultReturned,
        DonationStatus::AppointmentCancelled,
        DonationStatus::AppointmentAbsent,
        DonationStatus::CustomerCancelled,
        DonationStatus::Rejected,
    ];

    proptest! {
        /// Property: whatever sequence of transition attempts is thrown at a
        /// donation, the statuses it actually walks through form a valid path
        /// of the table, with no repeated consecutive status.
        #[test]
        fn observed_status_walks_follow_the_table(
            targets in prop::collection::vec(0usize..ALL_STATUSES.len(), 0..16)
        ) {
            let mut f = submitted(None);
            let mut walk = vec![f.donation.status()];
            let appt = f.now + Duration::days(2);

            for idx in targets {
                let target = ALL_STATUSES[idx];
                let appointment_at =
                    (target == DonationStatus::AppointmentConfirmed).then_some(appt);
                let result = if target == DonationStatus::Completed {
                    let events = f.donation.handle(&DonationCommand::CompleteDonation(
                        CompleteDonation {
                            facility_id: f.facility_id,
                            donation_id: f.donation_id,
                            actor: staff(),
                            note: None,
                            result: ok_result(),
                            occurred_at: f.now,
                        },
                    ));
                    events.map(|events| {
                        for e in &events {
                            f.donation.apply(e);
                        }
                    })
                } else {
                    let now = f.now;
                    transition(&mut f, target, staff(), appointment_at, now)
                };

                if result.is_ok() {
                    walk.push(f.donation.status());
                }
            }

            for pair in walk.windows(2) {
                prop_assert!(transition_allowed(pair[0], pair[1]),
                    "observed edge {} -> {} is not in the table", pair[0], pair[1]);
                prop_assert!(pair[0] != pair[1]);
            }

            // Terminal states really are terminal: once reached, the walk ends.
            for (i, s) in walk.iter().enumerate() {
                if allowed_targets(*s).is_empty() {
                    prop_assert_eq!(i, walk.len() - 1);
                }
            }
        }
    }
}
