use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

use hemobank_core::{Actor, AggregateId, DomainError, DonorId, FacilityId};
use hemobank_events::EventBus;
use hemobank_inventory::{
    BloodUnit, BloodUnitCommand, BloodUnitId, CollectWholeBlood, ComponentSpec, DeductVolume,
    DonorCommand, DonorRecord, DonorRecordId, RecordDonation, RegisterComponent, RestoreVolume,
    SeparateComponents, SeparationPlan, UnitStatus, UpdateUnitStatus,
};
use hemobank_typing::{compatible_donors, BloodType, ComponentType, PlateletPolicy};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::{UnitLedgerProjection, UnitReadModel};
use crate::read_model::FacilityStore;
use crate::services::{DONOR_AGGREGATE, UNIT_AGGREGATE};

/// Requested component volumes and expiries for one separation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeparationRequest {
    pub red_cells_ml: u32,
    pub red_cells_expire_at: DateTime<Utc>,
    pub plasma_ml: u32,
    pub plasma_expire_at: DateTime<Utc>,
    pub platelets_ml: u32,
    pub platelets_expire_at: DateTime<Utc>,
}

/// The four units touched by a successful separation.
#[derive(Debug, Clone)]
pub struct SeparationOutcome {
    pub parent: BloodUnit,
    pub red_cells: BloodUnit,
    pub plasma: BloodUnit,
    pub platelets: BloodUnit,
}

/// Filters for compatible-unit searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSearchFilter {
    pub status: Option<UnitStatus>,
    pub exclude_expired: bool,
    pub platelet_policy: PlateletPolicy,
}

impl Default for UnitSearchFilter {
    fn default() -> Self {
        Self {
            status: Some(UnitStatus::Available),
            exclude_expired: true,
            platelet_policy: PlateletPolicy::AboMatched,
        }
    }
}

/// Ledger operations: intake, separation, volume accounting, status, search.
pub struct InventoryService<S, B, L>
where
    S: EventStore,
    B: EventBus<JsonValue>,
    L: FacilityStore<BloodUnitId, UnitReadModel>,
{
    dispatcher: Arc<CommandDispatcher<S, B>>,
    ledger: Arc<UnitLedgerProjection<L>>,
}

impl<S, B, L> InventoryService<S, B, L>
where
    S: EventStore,
    B: EventBus<JsonValue>,
    L: FacilityStore<BloodUnitId, UnitReadModel>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        ledger: Arc<UnitLedgerProjection<L>>,
    ) -> Self {
        Self { dispatcher, ledger }
    }

    /// Intake a donated whole-blood unit.
    ///
    /// The donor's record is written first: it pins the donor's blood type
    /// on first donation and rejects any mismatch before a unit exists.
    /// Unit-side validations are front-loaded here so the donor append
    /// cannot happen for a unit that would then fail its own validation.
    pub fn create_whole_blood_unit(
        &self,
        facility_id: FacilityId,
        donor_id: DonorId,
        blood_type: BloodType,
        volume_ml: u32,
        expires_at: DateTime<Utc>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<BloodUnit, DispatchError> {
        if volume_ml == 0 {
            return Err(DomainError::validation("unit volume must be positive").into());
        }
        if expires_at <= now {
            return Err(DomainError::validation("unit expiry must be in the future").into());
        }

        let unit_id = BloodUnitId::new(AggregateId::new());
        let donor_stream = DonorRecordId::for_donor(donor_id);

        self.dispatcher.dispatch(
            facility_id,
            donor_stream.0,
            DONOR_AGGREGATE,
            DonorCommand::RecordDonation(RecordDonation {
                facility_id,
                donor_id,
                unit_id,
                blood_type,
                volume_ml,
                occurred_at: now,
            }),
            |_, id| DonorRecord::empty(DonorRecordId::new(id)),
        )?;

        self.dispatcher.dispatch(
            facility_id,
            unit_id.0,
            UNIT_AGGREGATE,
            BloodUnitCommand::CollectWholeBlood(CollectWholeBlood {
                facility_id,
                unit_id,
                donor_id,
                blood_type,
                volume_ml,
                expires_at,
                actor,
                occurred_at: now,
            }),
            |_, id| BloodUnit::empty(BloodUnitId::new(id)),
        )?;

        info!(unit = %unit_id, donor = %donor_id, %blood_type, volume_ml, "whole blood unit collected");
        self.load_unit(facility_id, unit_id)
    }

    /// Separate a whole-blood unit into red cells, plasma, and platelets.
    ///
    /// All validation happens on the parent before anything persists; the
    /// parent's separation event carries the full child plan, then the three
    /// child units are registered from it. The whole write is all-or-nothing
    /// from the caller's perspective: a validation failure aborts before any
    /// persistence.
    pub fn separate_components(
        &self,
        facility_id: FacilityId,
        parent_unit_id: BloodUnitId,
        request: SeparationRequest,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<SeparationOutcome, DispatchError> {
        let parent = self.load_unit(facility_id, parent_unit_id)?;
        let donor_id = parent.donor_id().ok_or(DispatchError::NotFound)?;
        let blood_type = parent.blood_type().ok_or(DispatchError::NotFound)?;

        let plan = SeparationPlan {
            red_cells: ComponentSpec {
                unit_id: BloodUnitId::new(AggregateId::new()),
                volume_ml: request.red_cells_ml,
                expires_at: request.red_cells_expire_at,
            },
            plasma: ComponentSpec {
                unit_id: BloodUnitId::new(AggregateId::new()),
                volume_ml: request.plasma_ml,
                expires_at: request.plasma_expire_at,
            },
            platelets: ComponentSpec {
                unit_id: BloodUnitId::new(AggregateId::new()),
                volume_ml: request.platelets_ml,
                expires_at: request.platelets_expire_at,
            },
        };

        self.dispatcher.dispatch(
            facility_id,
            parent_unit_id.0,
            UNIT_AGGREGATE,
            BloodUnitCommand::SeparateComponents(SeparateComponents {
                facility_id,
                unit_id: parent_unit_id,
                plan,
                actor,
                occurred_at: now,
            }),
            |_, id| BloodUnit::empty(BloodUnitId::new(id)),
        )?;

        // Child registrations cannot fail validation: the parent validated
        // every volume and expiry, and the ids are fresh.
        for (component, spec) in plan.components() {
            self.dispatcher.dispatch(
                facility_id,
                spec.unit_id.0,
                UNIT_AGGREGATE,
                BloodUnitCommand::RegisterComponent(RegisterComponent {
                    facility_id,
                    unit_id: spec.unit_id,
                    parent_unit_id,
                    donor_id,
                    blood_type,
                    component,
                    volume_ml: spec.volume_ml,
                    expires_at: spec.expires_at,
                    actor,
                    occurred_at: now,
                }),
                |_, id| BloodUnit::empty(BloodUnitId::new(id)),
            )?;
        }

        info!(
            parent = %parent_unit_id,
            red_cells_ml = request.red_cells_ml,
            plasma_ml = request.plasma_ml,
            platelets_ml = request.platelets_ml,
            "whole blood unit separated"
        );

        Ok(SeparationOutcome {
            parent: self.load_unit(facility_id, parent_unit_id)?,
            red_cells: self.load_unit(facility_id, plan.red_cells.unit_id)?,
            plasma: self.load_unit(facility_id, plan.plasma.unit_id)?,
            platelets: self.load_unit(facility_id, plan.platelets.unit_id)?,
        })
    }

    /// Deduct volume from a unit (allocation consumes stock).
    ///
    /// Race-free: the optimistic append guarantees two concurrent
    /// deductions cannot both succeed past the remaining volume.
    pub fn deduct_volume(
        &self,
        facility_id: FacilityId,
        unit_id: BloodUnitId,
        amount_ml: u32,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<BloodUnit, DispatchError> {
        self.dispatcher.dispatch(
            facility_id,
            unit_id.0,
            UNIT_AGGREGATE,
            BloodUnitCommand::DeductVolume(DeductVolume {
                facility_id,
                unit_id,
                amount_ml,
                actor,
                occurred_at: now,
            }),
            |_, id| BloodUnit::empty(BloodUnitId::new(id)),
        )?;

        self.load_unit(facility_id, unit_id)
    }

    /// Return previously deducted volume to a unit (allocation rollback).
    pub fn restore_volume(
        &self,
        facility_id: FacilityId,
        unit_id: BloodUnitId,
        amount_ml: u32,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<BloodUnit, DispatchError> {
        self.dispatcher.dispatch(
            facility_id,
            unit_id.0,
            UNIT_AGGREGATE,
            BloodUnitCommand::RestoreVolume(RestoreVolume {
                facility_id,
                unit_id,
                amount_ml,
                actor,
                occurred_at: now,
            }),
            |_, id| BloodUnit::empty(BloodUnitId::new(id)),
        )?;

        self.load_unit(facility_id, unit_id)
    }

    /// Staff-set unit status (no transition table beyond the volume guard).
    pub fn update_status(
        &self,
        facility_id: FacilityId,
        unit_id: BloodUnitId,
        status: UnitStatus,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<BloodUnit, DispatchError> {
        self.dispatcher.dispatch(
            facility_id,
            unit_id.0,
            UNIT_AGGREGATE,
            BloodUnitCommand::UpdateStatus(UpdateUnitStatus {
                facility_id,
                unit_id,
                status,
                actor,
                occurred_at: now,
            }),
            |_, id| BloodUnit::empty(BloodUnitId::new(id)),
        )?;

        self.load_unit(facility_id, unit_id)
    }

    /// Ledger units a recipient of the given type can receive, for the given
    /// component, soonest-expiring first.
    pub fn find_compatible_units(
        &self,
        facility_id: FacilityId,
        recipient: BloodType,
        component: ComponentType,
        filter: UnitSearchFilter,
        as_of: DateTime<Utc>,
    ) -> Vec<UnitReadModel> {
        let donor_types = compatible_donors(recipient, component, filter.platelet_policy);

        let mut units: Vec<_> = self
            .ledger
            .list(facility_id)
            .into_iter()
            .filter(|u| u.component == component)
            .filter(|u| donor_types.contains(&u.blood_type))
            .filter(|u| filter.status.is_none_or(|s| u.status == s))
            .filter(|u| !(filter.exclude_expired && u.is_expired_at(as_of)))
            .collect();
        units.sort_by_key(|u| u.expires_at);
        units
    }

    /// Rehydrate the authoritative state of one unit.
    pub fn load_unit(
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

    /// Rehydrate a donor's record (established blood type, donation totals).
    pub fn load_donor_record(
        &self,
        facility_id: FacilityId,
        donor_id: DonorId,
    ) -> Result<DonorRecord, DispatchError> {
        let stream = DonorRecordId::for_donor(donor_id);
        self.dispatcher.rehydrate(facility_id, stream.0, |_, id| {
            DonorRecord::empty(DonorRecordId::new(id))
        })
    }
}
