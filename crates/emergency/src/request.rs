use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use hemobank_core::{
    AccountId, Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, DonorId,
    FacilityId, StaffId,
};
use hemobank_events::Event;
use hemobank_inventory::BloodUnitId;
use hemobank_typing::{BloodType, ComponentType};

/// How long a submitted request stays valid.
const VALIDITY_WINDOW_DAYS: i64 = 1;

/// Emergency request identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub AggregateId);

impl RequestId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Who is asking for blood.
///
/// Hospitals are served from ledger stock; individuals are pointed at
/// compatible donors instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequesterKind {
    Hospital,
    Individual,
}

/// Lifecycle status of an emergency request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    ContactsProvided,
}

impl core::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::ContactsProvided => "contacts_provided",
        };
        f.write_str(s)
    }
}

/// Targets reachable from `from`. Every decision is made from `Pending`;
/// the decided states are terminal.
pub const fn allowed_targets(from: RequestStatus) -> &'static [RequestStatus] {
    use RequestStatus::*;
    match from {
        Pending => &[Approved, Rejected, ContactsProvided],
        Approved | Rejected | ContactsProvided => &[],
    }
}

pub fn ensure_transition(from: RequestStatus, to: RequestStatus) -> DomainResult<()> {
    if allowed_targets(from).contains(&to) {
        Ok(())
    } else {
        Err(DomainError::invalid_transition(from, to))
    }
}

/// A donor suggested to an individual requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedDonor {
    pub donor_id: DonorId,
    pub blood_type: BloodType,
}

/// Aggregate root: EmergencyRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyRequest {
    id: RequestId,
    facility_id: Option<FacilityId>,
    requester: Option<AccountId>,
    requester_kind: RequesterKind,
    blood_type: Option<BloodType>,
    /// `None` means whole blood (the default for urgent requests).
    component: Option<ComponentType>,
    required_volume_ml: u32,
    used_volume_ml: u32,
    assigned_unit_id: Option<BloodUnitId>,
    status: RequestStatus,
    rejection_reason: Option<String>,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    suggested_donors: Vec<SuggestedDonor>,
    version: u64,
    created: bool,
}

impl EmergencyRequest {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: RequestId) -> Self {
        Self {
            id,
            facility_id: None,
            requester: None,
            requester_kind: RequesterKind::Hospital,
            blood_type: None,
            component: None,
            required_volume_ml: 0,
            used_volume_ml: 0,
            assigned_unit_id: None,
            status: RequestStatus::Pending,
            rejection_reason: None,
            starts_at: None,
            ends_at: None,
            suggested_donors: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> RequestId {
        self.id
    }

    pub fn facility_id(&self) -> Option<FacilityId> {
        self.facility_id
    }

    pub fn requester(&self) -> Option<AccountId> {
        self.requester
    }

    pub fn requester_kind(&self) -> RequesterKind {
        self.requester_kind
    }

    pub fn blood_type(&self) -> Option<BloodType> {
        self.blood_type
    }

    pub fn component(&self) -> Option<ComponentType> {
        self.component
    }

    /// The component actually being requested; whole blood when unspecified.
    pub fn effective_component(&self) -> ComponentType {
        self.component.unwrap_or(ComponentType::WholeBlood)
    }

    pub fn required_volume_ml(&self) -> u32 {
        self.required_volume_ml
    }

    pub fn used_volume_ml(&self) -> u32 {
        self.used_volume_ml
    }

    pub fn assigned_unit_id(&self) -> Option<BloodUnitId> {
        self.assigned_unit_id
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        self.starts_at
    }

    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at
    }

    pub fn suggested_donors(&self) -> &[SuggestedDonor] {
        &self.suggested_donors
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for EmergencyRequest {
    type Id = RequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SubmitRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub facility_id: FacilityId,
    pub request_id: RequestId,
    pub requester: AccountId,
    pub requester_kind: RequesterKind,
    pub blood_type: BloodType,
    pub component: Option<ComponentType>,
    pub required_volume_ml: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveRequest (hospital requests only).
///
/// The unit-side volume check and the actual deduction are orchestrated by
/// the allocation service; this aggregate enforces the request-side rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub facility_id: FacilityId,
    pub request_id: RequestId,
    pub unit_id: BloodUnitId,
    pub used_volume_ml: u32,
    pub staff: StaffId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectRequest (hospital requests only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRequest {
    pub facility_id: FacilityId,
    pub request_id: RequestId,
    pub reason: String,
    pub staff: StaffId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ProvideContacts (individual requests only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvideContacts {
    pub facility_id: FacilityId,
    pub request_id: RequestId,
    pub donors: Vec<SuggestedDonor>,
    pub staff: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestCommand {
    SubmitRequest(SubmitRequest),
    ApproveRequest(ApproveRequest),
    RejectRequest(RejectRequest),
    ProvideContacts(ProvideContacts),
}

/// Event: RequestSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSubmitted {
    pub facility_id: FacilityId,
    pub request_id: RequestId,
    pub requester: AccountId,
    pub requester_kind: RequesterKind,
    pub blood_type: BloodType,
    pub component: Option<ComponentType>,
    pub required_volume_ml: u32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestApproved {
    pub facility_id: FacilityId,
    pub request_id: RequestId,
    pub previous: RequestStatus,
    pub unit_id: BloodUnitId,
    pub used_volume_ml: u32,
    pub staff: StaffId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRejected {
    pub facility_id: FacilityId,
    pub request_id: RequestId,
    pub previous: RequestStatus,
    pub reason: String,
    pub staff: StaffId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DonorContactsProvided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorContactsProvided {
    pub facility_id: FacilityId,
    pub request_id: RequestId,
    pub previous: RequestStatus,
    pub donors: Vec<SuggestedDonor>,
    pub staff: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestEvent {
    RequestSubmitted(RequestSubmitted),
    RequestApproved(RequestApproved),
    RequestRejected(RequestRejected),
    ContactsProvided(DonorContactsProvided),
}

impl Event for RequestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RequestEvent::RequestSubmitted(_) => "emergency.request.submitted",
            RequestEvent::RequestApproved(_) => "emergency.request.approved",
            RequestEvent::RequestRejected(_) => "emergency.request.rejected",
            RequestEvent::ContactsProvided(_) => "emergency.request.contacts_provided",
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RequestEvent::RequestSubmitted(e) => e.occurred_at,
            RequestEvent::RequestApproved(e) => e.occurred_at,
            RequestEvent::RequestRejected(e) => e.occurred_at,
            RequestEvent::ContactsProvided(e) => e.occurred_at,
        }
    }
}

impl Aggregate for EmergencyRequest {
    type Command = RequestCommand;
    type Event = RequestEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RequestEvent::RequestSubmitted(e) => {
                self.id = e.request_id;
                self.facility_id = Some(e.facility_id);
                self.requester = Some(e.requester);
                self.requester_kind = e.requester_kind;
                self.blood_type = Some(e.blood_type);
                self.component = e.component;
                self.required_volume_ml = e.required_volume_ml;
                self.status = RequestStatus::Pending;
                self.starts_at = Some(e.starts_at);
                self.ends_at = Some(e.ends_at);
                self.created = true;
            }
            RequestEvent::RequestApproved(e) => {
                self.status = RequestStatus::Approved;
                self.assigned_unit_id = Some(e.unit_id);
                self.used_volume_ml = e.used_volume_ml;
            }
            RequestEvent::RequestRejected(e) => {
                self.status = RequestStatus::Rejected;
                self.rejection_reason = Some(e.reason.clone());
            }
            RequestEvent::ContactsProvided(e) => {
                self.status = RequestStatus::ContactsProvided;
                self.suggested_donors = e.donors.clone();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RequestCommand::SubmitRequest(cmd) => self.handle_submit(cmd),
            RequestCommand::ApproveRequest(cmd) => self.handle_approve(cmd),
            RequestCommand::RejectRequest(cmd) => self.handle_reject(cmd),
            RequestCommand::ProvideContacts(cmd) => self.handle_provide_contacts(cmd),
        }
    }
}

impl EmergencyRequest {
    fn ensure_facility(&self, facility_id: FacilityId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.facility_id != Some(facility_id) {
            return Err(DomainError::invariant("facility mismatch"));
        }
        Ok(())
    }

    fn ensure_request_id(&self, request_id: RequestId) -> Result<(), DomainError> {
        if self.id != request_id {
            return Err(DomainError::invariant("request_id mismatch"));
        }
        Ok(())
    }

    fn ensure_hospital(&self) -> Result<(), DomainError> {
        if self.requester_kind != RequesterKind::Hospital {
            return Err(DomainError::forbidden(
                "only hospital requests can be decided against ledger stock",
            ));
        }
        Ok(())
    }

    fn handle_submit(&self, cmd: &SubmitRequest) -> Result<Vec<RequestEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("request already exists"));
        }
        if cmd.required_volume_ml == 0 {
            return Err(DomainError::validation(
                "required volume must be positive",
            ));
        }

        Ok(vec![RequestEvent::RequestSubmitted(RequestSubmitted {
            facility_id: cmd.facility_id,
            request_id: cmd.request_id,
            requester: cmd.requester,
            requester_kind: cmd.requester_kind,
            blood_type: cmd.blood_type,
            component: cmd.component,
            required_volume_ml: cmd.required_volume_ml,
            starts_at: cmd.occurred_at,
            ends_at: cmd.occurred_at + Duration::days(VALIDITY_WINDOW_DAYS),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveRequest) -> Result<Vec<RequestEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_facility(cmd.facility_id)?;
        self.ensure_request_id(cmd.request_id)?;
        ensure_transition(self.status, RequestStatus::Approved)?;
        self.ensure_hospital()?;

        if cmd.used_volume_ml == 0 {
            return Err(DomainError::validation("allocated volume must be positive"));
        }
        if cmd.used_volume_ml > self.required_volume_ml {
            return Err(DomainError::insufficient_volume(
                cmd.used_volume_ml,
                self.required_volume_ml,
            ));
        }

        Ok(vec![RequestEvent::RequestApproved(RequestApproved {
            facility_id: cmd.facility_id,
            request_id: cmd.request_id,
            previous: self.status,
            unit_id: cmd.unit_id,
            used_volume_ml: cmd.used_volume_ml,
            staff: cmd.staff,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectRequest) -> Result<Vec<RequestEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_facility(cmd.facility_id)?;
        self.ensure_request_id(cmd.request_id)?;
        ensure_transition(self.status, RequestStatus::Rejected)?;
        self.ensure_hospital()?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("rejection requires a reason"));
        }

        Ok(vec![RequestEvent::RequestRejected(RequestRejected {
            facility_id: cmd.facility_id,
            request_id: cmd.request_id,
            previous: self.status,
            reason: cmd.reason.clone(),
            staff: cmd.staff,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_provide_contacts(
        &self,
        cmd: &ProvideContacts,
    ) -> Result<Vec<RequestEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_facility(cmd.facility_id)?;
        self.ensure_request_id(cmd.request_id)?;
        ensure_transition(self.status, RequestStatus::ContactsProvided)?;

        if self.requester_kind != RequesterKind::Individual {
            return Err(DomainError::forbidden(
                "donor contacts are only provided to individual requesters",
            ));
        }
        if cmd.donors.is_empty() {
            return Err(DomainError::validation(
                "at least one suggested donor is required",
            ));
        }

        Ok(vec![RequestEvent::ContactsProvided(DonorContactsProvided {
            facility_id: cmd.facility_id,
            request_id: cmd.request_id,
            previous: self.status,
            donors: cmd.donors.clone(),
            staff: cmd.staff,
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

    struct Fixture {
        request: EmergencyRequest,
        facility_id: FacilityId,
        request_id: RequestId,
        now: DateTime<Utc>,
    }

    fn submitted(kind: RequesterKind, required_volume_ml: u32) -> Fixture {
        let facility_id = FacilityId::new();
        let request_id = RequestId::new(AggregateId::new());
        let now = Utc::now();
        let mut request = EmergencyRequest::empty(request_id);

        let events = request
            .handle(&RequestCommand::SubmitRequest(SubmitRequest {
                facility_id,
                request_id,
                requester: AccountId::new(),
                requester_kind: kind,
                blood_type: bt("O+"),
                component: None,
                required_volume_ml,
                occurred_at: now,
            }))
            .unwrap();
        request.apply(&events[0]);

        Fixture {
            request,
            facility_id,
            request_id,
            now,
        }
    }

    fn approve_cmd(f: &Fixture, used_volume_ml: u32) -> RequestCommand {
        RequestCommand::ApproveRequest(ApproveRequest {
            facility_id: f.facility_id,
            request_id: f.request_id,
            unit_id: BloodUnitId::new(AggregateId::new()),
            used_volume_ml,
            staff: StaffId::new(),
            occurred_at: f.now,
        })
    }

    #[test]
    fn submission_opens_a_one_day_validity_window() {
        let f = submitted(RequesterKind::Hospital, 300);
        assert_eq!(f.request.status(), RequestStatus::Pending);
        let starts = f.request.starts_at().unwrap();
        let ends = f.request.ends_at().unwrap();
        assert_eq!(ends - starts, Duration::days(1));
        assert_eq!(f.request.effective_component(), ComponentType::WholeBlood);
    }

    #[test]
    fn approval_assigns_unit_and_volume() {
        let mut f = submitted(RequesterKind::Hospital, 300);
        let events = f.request.handle(&approve_cmd(&f, 300)).unwrap();
        f.request.apply(&events[0]);

        assert_eq!(f.request.status(), RequestStatus::Approved);
        assert_eq!(f.request.used_volume_ml(), 300);
        assert!(f.request.assigned_unit_id().is_some());
    }

    #[test]
    fn second_decision_is_rejected() {
        let mut f = submitted(RequesterKind::Hospital, 300);
        let events = f.request.handle(&approve_cmd(&f, 200)).unwrap();
        f.request.apply(&events[0]);

        let err = f.request.handle(&approve_cmd(&f, 100)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));

        let err = f
            .request
            .handle(&RequestCommand::RejectRequest(RejectRequest {
                facility_id: f.facility_id,
                request_id: f.request_id,
                reason: "late".to_string(),
                staff: StaffId::new(),
                occurred_at: f.now,
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn allocation_above_required_volume_is_rejected() {
        let f = submitted(RequesterKind::Hospital, 300);
        let err = f.request.handle(&approve_cmd(&f, 301)).unwrap_err();
        match err {
            DomainError::InsufficientVolume {
                requested_ml,
                available_ml,
            } => {
                assert_eq!(requested_ml, 301);
                assert_eq!(available_ml, 300);
            }
            other => panic!("expected InsufficientVolume, got {other:?}"),
        }
    }

    #[test]
    fn individual_requests_cannot_be_approved_or_rejected() {
        let f = submitted(RequesterKind::Individual, 300);
        let err = f.request.handle(&approve_cmd(&f, 300)).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));

        let err = f
            .request
            .handle(&RequestCommand::RejectRequest(RejectRequest {
                facility_id: f.facility_id,
                request_id: f.request_id,
                reason: "no stock".to_string(),
                staff: StaffId::new(),
                occurred_at: f.now,
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn contacts_go_to_individuals_only() {
        let mut f = submitted(RequesterKind::Individual, 300);
        let donors = vec![SuggestedDonor {
            donor_id: DonorId::new(),
            blood_type: bt("O-"),
        }];
        let events = f
            .request
            .handle(&RequestCommand::ProvideContacts(ProvideContacts {
                facility_id: f.facility_id,
                request_id: f.request_id,
                donors: donors.clone(),
                staff: StaffId::new(),
                occurred_at: f.now,
            }))
            .unwrap();
        f.request.apply(&events[0]);
        assert_eq!(f.request.status(), RequestStatus::ContactsProvided);
        assert_eq!(f.request.suggested_donors(), donors.as_slice());

        let hospital = submitted(RequesterKind::Hospital, 300);
        let err = hospital
            .request
            .handle(&RequestCommand::ProvideContacts(ProvideContacts {
                facility_id: hospital.facility_id,
                request_id: hospital.request_id,
                donors,
                staff: StaffId::new(),
                occurred_at: hospital.now,
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn rejection_requires_a_reason() {
        let f = submitted(RequesterKind::Hospital, 250);
        let err = f
            .request
            .handle(&RequestCommand::RejectRequest(RejectRequest {
                facility_id: f.facility_id,
                request_id: f.request_id,
                reason: "  ".to_string(),
                staff: StaffId::new(),
                occurred_at: f.now,
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn zero_volume_submission_is_rejected() {
        let request = EmergencyRequest::empty(RequestId::new(AggregateId::new()));
        let err = request
            .handle(&RequestCommand::SubmitRequest(SubmitRequest {
                facility_id: FacilityId::new(),
                request_id: RequestId::new(AggregateId::new()),
                requester: AccountId::new(),
                requester_kind: RequesterKind::Hospital,
                blood_type: bt("B+"),
                component: Some(ComponentType::Plasma),
                required_volume_ml: 0,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
