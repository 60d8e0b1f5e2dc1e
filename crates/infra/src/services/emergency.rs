use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use hemobank_core::{AccountId, Actor, Aggregate, AggregateId, DomainError, FacilityId, StaffId};
use hemobank_emergency::{
    ApproveRequest, EmergencyRequest, ProvideContacts, RejectRequest, RequestCommand, RequestId,
    RequesterKind, SubmitRequest, SuggestedDonor,
};
use hemobank_events::EventBus;
use hemobank_inventory::{
    BloodUnit, BloodUnitCommand, BloodUnitId, DeductVolume, RestoreVolume,
};
use hemobank_typing::{BloodType, ComponentType};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::{EmergencyBoardProjection, RequestReadModel};
use crate::read_model::FacilityStore;
use crate::services::{REQUEST_AGGREGATE, UNIT_AGGREGATE};

/// Result of a bulk rejection sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRejectOutcome {
    pub count: usize,
    pub request_ids: Vec<RequestId>,
}

/// Emergency allocation operations: submission, approval against ledger
/// stock, rejection (single and bulk), and donor-contact provision.
pub struct EmergencyService<S, B, R>
where
    S: EventStore,
    B: EventBus<JsonValue>,
    R: FacilityStore<RequestId, RequestReadModel>,
{
    dispatcher: Arc<CommandDispatcher<S, B>>,
    board: Arc<EmergencyBoardProjection<R>>,
}

impl<S, B, R> EmergencyService<S, B, R>
where
    S: EventStore,
    B: EventBus<JsonValue>,
    R: FacilityStore<RequestId, RequestReadModel>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        board: Arc<EmergencyBoardProjection<R>>,
    ) -> Self {
        Self { dispatcher, board }
    }

    /// Submit an urgent request (validity window opens now, closes +1 day).
    pub fn submit(
        &self,
        facility_id: FacilityId,
        requester: AccountId,
        requester_kind: RequesterKind,
        blood_type: BloodType,
        component: Option<ComponentType>,
        required_volume_ml: u32,
        now: DateTime<Utc>,
    ) -> Result<EmergencyRequest, DispatchError> {
        let request_id = RequestId::new(AggregateId::new());

        self.dispatcher.dispatch(
            facility_id,
            request_id.0,
            REQUEST_AGGREGATE,
            RequestCommand::SubmitRequest(SubmitRequest {
                facility_id,
                request_id,
                requester,
                requester_kind,
                blood_type,
                component,
                required_volume_ml,
                occurred_at: now,
            }),
            |_, id| EmergencyRequest::empty(RequestId::new(id)),
        )?;

        info!(request = %request_id, %blood_type, required_volume_ml, "emergency request submitted");
        self.load(facility_id, request_id)
    }

    /// Approve a pending hospital request against one ledger unit.
    ///
    /// Validation is front-loaded: the request-side rules run against the
    /// rehydrated request and the unit's remaining volume is checked before
    /// anything persists. The deduction lands first; if the approval then
    /// loses a race (the request was decided concurrently), the deducted
    /// volume is restored before the conflict surfaces.
    pub fn approve(
        &self,
        facility_id: FacilityId,
        request_id: RequestId,
        unit_id: BloodUnitId,
        used_volume_ml: u32,
        staff: StaffId,
        now: DateTime<Utc>,
    ) -> Result<EmergencyRequest, DispatchError> {
        let approve_cmd = RequestCommand::ApproveRequest(ApproveRequest {
            facility_id,
            request_id,
            unit_id,
            used_volume_ml,
            staff,
            occurred_at: now,
        });

        // Request-side pre-validation (state, eligibility, volume bound),
        // with no persistence.
        let request = self.load(facility_id, request_id)?;
        request.handle(&approve_cmd).map_err(DispatchError::from)?;

        // Unit-side pre-validation.
        let unit = self.load_unit(facility_id, unit_id)?;
        if used_volume_ml > unit.remaining_volume_ml() {
            return Err(DomainError::insufficient_volume(
                used_volume_ml,
                unit.remaining_volume_ml(),
            )
            .into());
        }

        let actor = Actor::Staff(staff);
        self.dispatcher.dispatch(
            facility_id,
            unit_id.0,
            UNIT_AGGREGATE,
            BloodUnitCommand::DeductVolume(DeductVolume {
                facility_id,
                unit_id,
                amount_ml: used_volume_ml,
                actor,
                occurred_at: now,
            }),
            |_, id| BloodUnit::empty(BloodUnitId::new(id)),
        )?;

        let approved = self.dispatcher.dispatch(
            facility_id,
            request_id.0,
            REQUEST_AGGREGATE,
            approve_cmd,
            |_, id| EmergencyRequest::empty(RequestId::new(id)),
        );

        if let Err(err) = approved {
            // The request was decided by a concurrent caller after our
            // deduction; give the volume back before surfacing the conflict.
            let restored = self.dispatcher.dispatch(
                facility_id,
                unit_id.0,
                UNIT_AGGREGATE,
                BloodUnitCommand::RestoreVolume(RestoreVolume {
                    facility_id,
                    unit_id,
                    amount_ml: used_volume_ml,
                    actor,
                    occurred_at: now,
                }),
                |_, id| BloodUnit::empty(BloodUnitId::new(id)),
            );
            if let Err(restore_err) = restored {
                warn!(
                    request = %request_id,
                    unit = %unit_id,
                    amount_ml = used_volume_ml,
                    error = ?restore_err,
                    "failed to restore volume after lost approval race"
                );
            }
            return Err(err);
        }

        info!(request = %request_id, unit = %unit_id, used_volume_ml, "emergency request approved");
        self.load(facility_id, request_id)
    }

    /// Reject a pending hospital request.
    pub fn reject(
        &self,
        facility_id: FacilityId,
        request_id: RequestId,
        reason: impl Into<String>,
        staff: StaffId,
        now: DateTime<Utc>,
    ) -> Result<EmergencyRequest, DispatchError> {
        self.dispatcher.dispatch(
            facility_id,
            request_id.0,
            REQUEST_AGGREGATE,
            RequestCommand::RejectRequest(RejectRequest {
                facility_id,
                request_id,
                reason: reason.into(),
                staff,
                occurred_at: now,
            }),
            |_, id| EmergencyRequest::empty(RequestId::new(id)),
        )?;

        info!(request = %request_id, "emergency request rejected");
        self.load(facility_id, request_id)
    }

    /// Bulk-reject every pending hospital request for a blood type and
    /// component.
    ///
    /// Each rejection is its own dispatched command with its own audit
    /// entry. A request decided concurrently mid-sweep is skipped, not an
    /// error; finding no candidates at all is.
    pub fn reject_by_blood_type(
        &self,
        facility_id: FacilityId,
        blood_type: BloodType,
        component: Option<ComponentType>,
        reason: impl Into<String>,
        staff: StaffId,
        now: DateTime<Utc>,
    ) -> Result<BulkRejectOutcome, DispatchError> {
        let matching = self
            .board
            .pending_hospital_requests(facility_id, blood_type, component);
        if matching.is_empty() {
            return Err(DispatchError::NotFound);
        }

        let reason = reason.into();
        let mut request_ids = Vec::with_capacity(matching.len());

        for candidate in matching {
            let result = self.dispatcher.dispatch(
                facility_id,
                candidate.request_id.0,
                REQUEST_AGGREGATE,
                RequestCommand::RejectRequest(RejectRequest {
                    facility_id,
                    request_id: candidate.request_id,
                    reason: reason.clone(),
                    staff,
                    occurred_at: now,
                }),
                |_, id| EmergencyRequest::empty(RequestId::new(id)),
            );

            match result {
                Ok(_) => request_ids.push(candidate.request_id),
                // Decided concurrently (or the board lagged); skip it.
                Err(DispatchError::Concurrency(_))
                | Err(DispatchError::InvalidTransition { .. }) => continue,
                Err(other) => return Err(other),
            }
        }

        info!(
            %blood_type,
            count = request_ids.len(),
            "bulk rejection sweep finished"
        );
        Ok(BulkRejectOutcome {
            count: request_ids.len(),
            request_ids,
        })
    }

    /// Provide an individual requester with suggested donor contacts.
    pub fn provide_contacts(
        &self,
        facility_id: FacilityId,
        request_id: RequestId,
        donors: Vec<SuggestedDonor>,
        staff: StaffId,
        now: DateTime<Utc>,
    ) -> Result<EmergencyRequest, DispatchError> {
        self.dispatcher.dispatch(
            facility_id,
            request_id.0,
            REQUEST_AGGREGATE,
            RequestCommand::ProvideContacts(ProvideContacts {
                facility_id,
                request_id,
                donors,
                staff,
                occurred_at: now,
            }),
            |_, id| EmergencyRequest::empty(RequestId::new(id)),
        )?;

        info!(request = %request_id, "donor contacts provided");
        self.load(facility_id, request_id)
    }

    /// Rehydrate the authoritative state of one request.
    pub fn load(
        &self,
        facility_id: FacilityId,
        request_id: RequestId,
    ) -> Result<EmergencyRequest, DispatchError> {
        let request = self.dispatcher.rehydrate(facility_id, request_id.0, |_, id| {
            EmergencyRequest::empty(RequestId::new(id))
        })?;
        if !request.exists() {
            return Err(DispatchError::NotFound);
        }
        Ok(request)
    }

    fn load_unit(
        &self,
        facility_id: FacilityId,
        unit_id: BloodUnitId,
    ) -> Result<BloodUnit, DispatchError> {
        let unit = self.dispatcher.rehydrate(facility_id, unit_id.0, |_, id| {
            BloodUnit::empty(BloodUnitId::new(id))
        })?;
        if !unit.exists() {
            return Err(DispatchError::NotFound);
        }
        Ok(unit)
    }
}
