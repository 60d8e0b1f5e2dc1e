use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use hemobank_core::{Actor, AggregateId, FacilityId};
use hemobank_events::EventEnvelope;
use hemobank_inventory::{BloodUnitEvent, BloodUnitId};

use crate::read_model::FacilityStore;

/// Classification of an audit record on a blood unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitActionKind {
    Created,
    StatusUpdate,
    VolumeChange,
    ComponentsSeparated,
}

/// One append-only audit record on a blood unit.
///
/// Materialized from the unit's event stream; never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloodUnitAction {
    pub action_id: Uuid,
    pub unit_id: BloodUnitId,
    pub actor: Actor,
    pub kind: UnitActionKind,
    pub previous_value: Option<String>,
    pub new_value: String,
    pub occurred_at: DateTime<Utc>,
}

/// Full audit history of one unit (ordered oldest-first).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnitActionLog {
    pub actions: Vec<BloodUnitAction>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    facility_id: FacilityId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum UnitActionsProjectionError {
    #[error("failed to deserialize blood unit event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Audit trail projection for blood units.
///
/// Every creation, volume change, separation, and status update on a unit
/// becomes one `BloodUnitAction` carrying the actor and the previous/new
/// values, in stream order.
#[derive(Debug)]
pub struct UnitActionsProjection<S>
where
    S: FacilityStore<BloodUnitId, UnitActionLog>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> UnitActionsProjection<S>
where
    S: FacilityStore<BloodUnitId, UnitActionLog>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Audit history for one unit, oldest entry first.
    pub fn history(&self, facility_id: FacilityId, unit_id: &BloodUnitId) -> Vec<BloodUnitAction> {
        self.store
            .get(facility_id, unit_id)
            .map(|log| log.actions)
            .unwrap_or_default()
    }

    /// Apply a published envelope into the projection (idempotent).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), UnitActionsProjectionError> {
        let facility_id = envelope.facility_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let key = CursorKey {
            facility_id,
            aggregate_id: envelope.aggregate_id(),
        };
        let last = *cursors.get(&key).unwrap_or(&0);
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(UnitActionsProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: BloodUnitEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| UnitActionsProjectionError::Deserialize(e.to_string()))?;

        let (unit_id, action) = action_from_event(envelope.event_id(), &ev);
        let mut log = self.store.get(facility_id, &unit_id).unwrap_or_default();
        log.actions.push(action);
        self.store.upsert(facility_id, unit_id, log);

        cursors.insert(key, seq);
        Ok(())
    }
}

fn action_from_event(event_id: Uuid, ev: &BloodUnitEvent) -> (BloodUnitId, BloodUnitAction) {
    let (unit_id, actor, kind, previous_value, new_value, occurred_at) = match ev {
        BloodUnitEvent::WholeBloodCollected(e) => (
            e.unit_id,
            e.actor,
            UnitActionKind::Created,
            None,
            format!(
                "whole blood {} {} ml, expires {}",
                e.blood_type, e.volume_ml, e.expires_at
            ),
            e.occurred_at,
        ),
        BloodUnitEvent::ComponentRegistered(e) => (
            e.unit_id,
            e.actor,
            UnitActionKind::Created,
            None,
            format!(
                "{} {} {} ml from unit {}, expires {}",
                e.blood_type, e.component, e.volume_ml, e.parent_unit_id, e.expires_at
            ),
            e.occurred_at,
        ),
        BloodUnitEvent::ComponentsSeparated(e) => (
            e.unit_id,
            e.actor,
            UnitActionKind::ComponentsSeparated,
            None,
            format!(
                "red cells {} ml / plasma {} ml / platelets {} ml",
                e.plan.red_cells.volume_ml, e.plan.plasma.volume_ml, e.plan.platelets.volume_ml
            ),
            e.occurred_at,
        ),
        BloodUnitEvent::VolumeDeducted(e) => (
            e.unit_id,
            e.actor,
            UnitActionKind::VolumeChange,
            Some(format!("{} ml", e.previous_remaining_ml)),
            format!("{} ml", e.new_remaining_ml),
            e.occurred_at,
        ),
        BloodUnitEvent::VolumeRestored(e) => (
            e.unit_id,
            e.actor,
            UnitActionKind::VolumeChange,
            Some(format!("{} ml", e.previous_remaining_ml)),
            format!("{} ml", e.new_remaining_ml),
            e.occurred_at,
        ),
        BloodUnitEvent::StatusUpdated(e) => (
            e.unit_id,
            e.actor,
            UnitActionKind::StatusUpdate,
            Some(e.previous.to_string()),
            e.new.to_string(),
            e.occurred_at,
        ),
    };

    (
        unit_id,
        BloodUnitAction {
            action_id: event_id,
            unit_id,
            actor,
            kind,
            previous_value,
            new_value,
            occurred_at,
        },
    )
}
