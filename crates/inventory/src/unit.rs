use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hemobank_core::{
    Actor, Aggregate, AggregateId, AggregateRoot, DomainError, DonorId, FacilityId,
};
use hemobank_events::Event;
use hemobank_typing::{BloodType, ComponentType};

/// Blood unit identifier (facility-scoped via `facility_id` fields in
/// events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BloodUnitId(pub AggregateId);

impl BloodUnitId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BloodUnitId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Physical status of a unit.
///
/// `Used` is never set directly by staff: it is derived from volume
/// accounting (a drained or separated unit is used). The other statuses are
/// staff-settable without a transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Available,
    Used,
    Expired,
    Transferred,
    Reserved,
    Damaged,
}

impl core::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            UnitStatus::Available => "available",
            UnitStatus::Used => "used",
            UnitStatus::Expired => "expired",
            UnitStatus::Transferred => "transferred",
            UnitStatus::Reserved => "reserved",
            UnitStatus::Damaged => "damaged",
        };
        f.write_str(s)
    }
}

/// One derived unit in a separation plan.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub unit_id: BloodUnitId,
    pub volume_ml: u32,
    pub expires_at: DateTime<Utc>,
}

/// Full plan for separating a whole-blood unit into its three components.
///
/// The plan is decided before anything is persisted; the parent's
/// `ComponentsSeparated` event carries it whole, so child registration can
/// always be completed from the parent's stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparationPlan {
    pub red_cells: ComponentSpec,
    pub plasma: ComponentSpec,
    pub platelets: ComponentSpec,
}

impl SeparationPlan {
    pub fn total_volume_ml(&self) -> u32 {
        self.red_cells.volume_ml + self.plasma.volume_ml + self.platelets.volume_ml
    }

    pub fn components(&self) -> [(ComponentType, ComponentSpec); 3] {
        [
            (ComponentType::RedCells, self.red_cells),
            (ComponentType::Plasma, self.plasma),
            (ComponentType::Platelets, self.platelets),
        ]
    }
}

/// Aggregate root: BloodUnit.
///
/// Volume invariants enforced here:
/// - `0 <= remaining_volume_ml <= total_volume_ml`
/// - `remaining_volume_ml == 0` implies `status == Used`
/// - a separated whole-blood unit is drained and used; its children point
///   back via `parent_unit_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloodUnit {
    id: BloodUnitId,
    facility_id: Option<FacilityId>,
    donor_id: Option<DonorId>,
    blood_type: Option<BloodType>,
    component: ComponentType,
    total_volume_ml: u32,
    remaining_volume_ml: u32,
    separated: bool,
    parent_unit_id: Option<BloodUnitId>,
    expires_at: Option<DateTime<Utc>>,
    status: UnitStatus,
    version: u64,
    created: bool,
}

impl BloodUnit {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: BloodUnitId) -> Self {
        Self {
            id,
            facility_id: None,
            donor_id: None,
            blood_type: None,
            component: ComponentType::WholeBlood,
            total_volume_ml: 0,
            remaining_volume_ml: 0,
            separated: false,
            parent_unit_id: None,
            expires_at: None,
            status: UnitStatus::Available,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> BloodUnitId {
        self.id
    }

    pub fn facility_id(&self) -> Option<FacilityId> {
        self.facility_id
    }

    pub fn donor_id(&self) -> Option<DonorId> {
        self.donor_id
    }

    pub fn blood_type(&self) -> Option<BloodType> {
        self.blood_type
    }

    pub fn component(&self) -> ComponentType {
        self.component
    }

    pub fn total_volume_ml(&self) -> u32 {
        self.total_volume_ml
    }

    pub fn remaining_volume_ml(&self) -> u32 {
        self.remaining_volume_ml
    }

    pub fn is_separated(&self) -> bool {
        self.separated
    }

    pub fn parent_unit_id(&self) -> Option<BloodUnitId> {
        self.parent_unit_id
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn status(&self) -> UnitStatus {
        self.status
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| e <= at)
    }
}

impl AggregateRoot for BloodUnit {
    type Id = BloodUnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CollectWholeBlood (intake of a donated whole-blood unit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectWholeBlood {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub donor_id: DonorId,
    pub blood_type: BloodType,
    pub volume_ml: u32,
    pub expires_at: DateTime<Utc>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterComponent (create one child unit of a separation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterComponent {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub parent_unit_id: BloodUnitId,
    pub donor_id: DonorId,
    pub blood_type: BloodType,
    pub component: ComponentType,
    pub volume_ml: u32,
    pub expires_at: DateTime<Utc>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SeparateComponents (split a whole-blood unit per a plan).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparateComponents {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub plan: SeparationPlan,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeductVolume (allocation consumes stock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductVolume {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub amount_ml: u32,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RestoreVolume (roll back a deduction whose allocation failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreVolume {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub amount_ml: u32,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateUnitStatus (staff-set status, no transition table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUnitStatus {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub status: UnitStatus,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BloodUnitCommand {
    CollectWholeBlood(CollectWholeBlood),
    RegisterComponent(RegisterComponent),
    SeparateComponents(SeparateComponents),
    DeductVolume(DeductVolume),
    RestoreVolume(RestoreVolume),
    UpdateStatus(UpdateUnitStatus),
}

/// Event: WholeBloodCollected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WholeBloodCollected {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub donor_id: DonorId,
    pub blood_type: BloodType,
    pub volume_ml: u32,
    pub expires_at: DateTime<Utc>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ComponentRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRegistered {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub parent_unit_id: BloodUnitId,
    pub donor_id: DonorId,
    pub blood_type: BloodType,
    pub component: ComponentType,
    pub volume_ml: u32,
    pub expires_at: DateTime<Utc>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ComponentsSeparated (on the parent unit; carries the full plan).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentsSeparated {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub plan: SeparationPlan,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VolumeDeducted (carries before/after for the audit trail).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDeducted {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub amount_ml: u32,
    pub previous_remaining_ml: u32,
    pub new_remaining_ml: u32,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VolumeRestored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRestored {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub amount_ml: u32,
    pub previous_remaining_ml: u32,
    pub new_remaining_ml: u32,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnitStatusUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatusUpdated {
    pub facility_id: FacilityId,
    pub unit_id: BloodUnitId,
    pub previous: UnitStatus,
    pub new: UnitStatus,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BloodUnitEvent {
    WholeBloodCollected(WholeBloodCollected),
    ComponentRegistered(ComponentRegistered),
    ComponentsSeparated(ComponentsSeparated),
    VolumeDeducted(VolumeDeducted),
    VolumeRestored(VolumeRestored),
    StatusUpdated(UnitStatusUpdated),
}

impl Event for BloodUnitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BloodUnitEvent::WholeBloodCollected(_) => "inventory.unit.collected",
            BloodUnitEvent::ComponentRegistered(_) => "inventory.unit.component_registered",
            BloodUnitEvent::ComponentsSeparated(_) => "inventory.unit.components_separated",
            BloodUnitEvent::VolumeDeducted(_) => "inventory.unit.volume_deducted",
            BloodUnitEvent::VolumeRestored(_) => "inventory.unit.volume_restored",
            BloodUnitEvent::StatusUpdated(_) => "inventory.unit.status_updated",
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BloodUnitEvent::WholeBloodCollected(e) => e.occurred_at,
            BloodUnitEvent::ComponentRegistered(e) => e.occurred_at,
            BloodUnitEvent::ComponentsSeparated(e) => e.occurred_at,
            BloodUnitEvent::VolumeDeducted(e) => e.occurred_at,
            BloodUnitEvent::VolumeRestored(e) => e.occurred_at,
            BloodUnitEvent::StatusUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for BloodUnit {
    type Command = BloodUnitCommand;
    type Event = BloodUnitEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BloodUnitEvent::WholeBloodCollected(e) => {
                self.id = e.unit_id;
                self.facility_id = Some(e.facility_id);
                self.donor_id = Some(e.donor_id);
                self.blood_type = Some(e.blood_type);
                self.component = ComponentType::WholeBlood;
                self.total_volume_ml = e.volume_ml;
                self.remaining_volume_ml = e.volume_ml;
                self.separated = false;
                self.parent_unit_id = None;
                self.expires_at = Some(e.expires_at);
                self.status = UnitStatus::Available;
                self.created = true;
            }
            BloodUnitEvent::ComponentRegistered(e) => {
                self.id = e.unit_id;
                self.facility_id = Some(e.facility_id);
                self.donor_id = Some(e.donor_id);
                self.blood_type = Some(e.blood_type);
                self.component = e.component;
                self.total_volume_ml = e.volume_ml;
                self.remaining_volume_ml = e.volume_ml;
                self.separated = false;
                self.parent_unit_id = Some(e.parent_unit_id);
                self.expires_at = Some(e.expires_at);
                self.status = UnitStatus::Available;
                self.created = true;
            }
            BloodUnitEvent::ComponentsSeparated(_) => {
                self.separated = true;
                self.remaining_volume_ml = 0;
                self.status = UnitStatus::Used;
            }
            BloodUnitEvent::VolumeDeducted(e) => {
                self.remaining_volume_ml = e.new_remaining_ml;
                if self.remaining_volume_ml == 0 {
                    self.status = UnitStatus::Used;
                }
            }
            BloodUnitEvent::VolumeRestored(e) => {
                self.remaining_volume_ml = e.new_remaining_ml;
                if self.status == UnitStatus::Used && self.remaining_volume_ml > 0 {
                    self.status = UnitStatus::Available;
                }
            }
            BloodUnitEvent::StatusUpdated(e) => {
                self.status = e.new;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BloodUnitCommand::CollectWholeBlood(cmd) => self.handle_collect(cmd),
            BloodUnitCommand::RegisterComponent(cmd) => self.handle_register(cmd),
            BloodUnitCommand::SeparateComponents(cmd) => self.handle_separate(cmd),
            BloodUnitCommand::DeductVolume(cmd) => self.handle_deduct(cmd),
            BloodUnitCommand::RestoreVolume(cmd) => self.handle_restore(cmd),
            BloodUnitCommand::UpdateStatus(cmd) => self.handle_update_status(cmd),
        }
    }
}

impl BloodUnit {
    fn ensure_facility(&self, facility_id: FacilityId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.facility_id != Some(facility_id) {
            return Err(DomainError::invariant("facility mismatch"));
        }
        Ok(())
    }

    fn ensure_unit_id(&self, unit_id: BloodUnitId) -> Result<(), DomainError> {
        if self.id != unit_id {
            return Err(DomainError::invariant("unit_id mismatch"));
        }
        Ok(())
    }

    fn ensure_volume_and_expiry(
        volume_ml: u32,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
        what: &str,
    ) -> Result<(), DomainError> {
        if volume_ml == 0 {
            return Err(DomainError::validation(format!(
                "{what} volume must be positive"
            )));
        }
        if expires_at <= now {
            return Err(DomainError::validation(format!(
                "{what} expiry must be in the future"
            )));
        }
        Ok(())
    }

    fn handle_collect(&self, cmd: &CollectWholeBlood) -> Result<Vec<BloodUnitEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("blood unit already exists"));
        }
        Self::ensure_volume_and_expiry(cmd.volume_ml, cmd.expires_at, cmd.occurred_at, "unit")?;

        Ok(vec![BloodUnitEvent::WholeBloodCollected(
            WholeBloodCollected {
                facility_id: cmd.facility_id,
                unit_id: cmd.unit_id,
                donor_id: cmd.donor_id,
                blood_type: cmd.blood_type,
                volume_ml: cmd.volume_ml,
                expires_at: cmd.expires_at,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_register(&self, cmd: &RegisterComponent) -> Result<Vec<BloodUnitEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("blood unit already exists"));
        }
        if cmd.component == ComponentType::WholeBlood {
            return Err(DomainError::validation(
                "a derived unit cannot be whole blood",
            ));
        }
        Self::ensure_volume_and_expiry(cmd.volume_ml, cmd.expires_at, cmd.occurred_at, "component")?;

        Ok(vec![BloodUnitEvent::ComponentRegistered(
            ComponentRegistered {
                facility_id: cmd.facility_id,
                unit_id: cmd.unit_id,
                parent_unit_id: cmd.parent_unit_id,
                donor_id: cmd.donor_id,
                blood_type: cmd.blood_type,
                component: cmd.component,
                volume_ml: cmd.volume_ml,
                expires_at: cmd.expires_at,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_separate(
        &self,
        cmd: &SeparateComponents,
    ) -> Result<Vec<BloodUnitEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_facility(cmd.facility_id)?;
        self.ensure_unit_id(cmd.unit_id)?;

        if self.component != ComponentType::WholeBlood {
            return Err(DomainError::conflict(
                "only whole-blood units can be separated",
            ));
        }
        if self.separated {
            return Err(DomainError::conflict("unit is already separated"));
        }
        if self.status != UnitStatus::Available {
            return Err(DomainError::conflict(format!(
                "unit is not available for separation (status: {})",
                self.status
            )));
        }

        for (component, spec) in cmd.plan.components() {
            Self::ensure_volume_and_expiry(
                spec.volume_ml,
                spec.expires_at,
                cmd.occurred_at,
                &component.to_string(),
            )?;
        }

        let requested = cmd.plan.total_volume_ml();
        if requested > self.total_volume_ml {
            return Err(DomainError::insufficient_volume(
                requested,
                self.total_volume_ml,
            ));
        }

        Ok(vec![BloodUnitEvent::ComponentsSeparated(
            ComponentsSeparated {
                facility_id: cmd.facility_id,
                unit_id: cmd.unit_id,
                plan: cmd.plan,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_deduct(&self, cmd: &DeductVolume) -> Result<Vec<BloodUnitEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_facility(cmd.facility_id)?;
        self.ensure_unit_id(cmd.unit_id)?;

        if cmd.amount_ml == 0 {
            return Err(DomainError::validation("deduction must be positive"));
        }
        if cmd.amount_ml > self.remaining_volume_ml {
            return Err(DomainError::insufficient_volume(
                cmd.amount_ml,
                self.remaining_volume_ml,
            ));
        }

        Ok(vec![BloodUnitEvent::VolumeDeducted(VolumeDeducted {
            facility_id: cmd.facility_id,
            unit_id: cmd.unit_id,
            amount_ml: cmd.amount_ml,
            previous_remaining_ml: self.remaining_volume_ml,
            new_remaining_ml: self.remaining_volume_ml - cmd.amount_ml,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restore(&self, cmd: &RestoreVolume) -> Result<Vec<BloodUnitEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_facility(cmd.facility_id)?;
        self.ensure_unit_id(cmd.unit_id)?;

        if cmd.amount_ml == 0 {
            return Err(DomainError::validation("restored volume must be positive"));
        }
        if self.separated {
            return Err(DomainError::conflict(
                "volume cannot be restored to a separated unit",
            ));
        }
        let new_remaining = self.remaining_volume_ml + cmd.amount_ml;
        if new_remaining > self.total_volume_ml {
            return Err(DomainError::invariant(
                "restore would exceed the unit's total volume",
            ));
        }

        Ok(vec![BloodUnitEvent::VolumeRestored(VolumeRestored {
            facility_id: cmd.facility_id,
            unit_id: cmd.unit_id,
            amount_ml: cmd.amount_ml,
            previous_remaining_ml: self.remaining_volume_ml,
            new_remaining_ml: new_remaining,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_status(
        &self,
        cmd: &UpdateUnitStatus,
    ) -> Result<Vec<BloodUnitEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_facility(cmd.facility_id)?;
        self.ensure_unit_id(cmd.unit_id)?;

        if cmd.status == UnitStatus::Used {
            return Err(DomainError::validation(
                "status 'used' is derived from volume accounting and cannot be set directly",
            ));
        }
        if self.remaining_volume_ml == 0 {
            return Err(DomainError::invariant(
                "a drained unit stays used; its status cannot be reassigned",
            ));
        }

        Ok(vec![BloodUnitEvent::StatusUpdated(UnitStatusUpdated {
            facility_id: cmd.facility_id,
            unit_id: cmd.unit_id,
            previous: self.status,
            new: cmd.status,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}
