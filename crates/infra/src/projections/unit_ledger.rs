use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use hemobank_core::{AggregateId, DonorId, FacilityId};
use hemobank_events::EventEnvelope;
use hemobank_inventory::{BloodUnitEvent, BloodUnitId, UnitStatus};
use hemobank_typing::{BloodType, ComponentType};

use crate::read_model::FacilityStore;

/// Queryable ledger read model: current state per blood unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReadModel {
    pub unit_id: BloodUnitId,
    pub donor_id: DonorId,
    pub blood_type: BloodType,
    pub component: ComponentType,
    pub total_volume_ml: u32,
    pub remaining_volume_ml: u32,
    pub separated: bool,
    pub parent_unit_id: Option<BloodUnitId>,
    pub expires_at: DateTime<Utc>,
    pub status: UnitStatus,
    pub updated_at: DateTime<Utc>,
}

impl UnitReadModel {
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at <= at
    }
}

/// Facility+aggregate cursor to support at-least-once delivery (idempotent
/// projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    facility_id: FacilityId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum UnitLedgerProjectionError {
    #[error("failed to deserialize blood unit event: {0}")]
    Deserialize(String),

    #[error("facility isolation violation: {0}")]
    FacilityIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("event for unknown unit: {0}")]
    UnknownUnit(String),
}

/// Blood unit ledger projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a
/// facility-isolated current-state view of every unit. Disposable and
/// rebuildable from the event stream.
#[derive(Debug)]
pub struct UnitLedgerProjection<S>
where
    S: FacilityStore<BloodUnitId, UnitReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> UnitLedgerProjection<S>
where
    S: FacilityStore<BloodUnitId, UnitReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query read model for one facility/unit.
    pub fn get(&self, facility_id: FacilityId, unit_id: &BloodUnitId) -> Option<UnitReadModel> {
        self.store.get(facility_id, unit_id)
    }

    /// List all units for a facility.
    pub fn list(&self, facility_id: FacilityId) -> Vec<UnitReadModel> {
        self.store.list(facility_id)
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces facility isolation
    /// - Enforces monotonic sequence per (facility, aggregate) stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), UnitLedgerProjectionError> {
        let facility_id = envelope.facility_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let key = CursorKey {
            facility_id,
            aggregate_id,
        };
        let last = *cursors.get(&key).unwrap_or(&0);

        if seq == 0 {
            return Err(UnitLedgerProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(UnitLedgerProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: BloodUnitEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| UnitLedgerProjectionError::Deserialize(e.to_string()))?;

        self.apply_event(facility_id, aggregate_id, &ev)?;

        // Advance cursor after successful apply.
        cursors.insert(key, seq);
        Ok(())
    }

    fn apply_event(
        &self,
        facility_id: FacilityId,
        aggregate_id: AggregateId,
        ev: &BloodUnitEvent,
    ) -> Result<(), UnitLedgerProjectionError> {
        // Validate facility isolation at the event level.
        let (event_facility, unit_id) = match ev {
            BloodUnitEvent::WholeBloodCollected(e) => (e.facility_id, e.unit_id),
            BloodUnitEvent::ComponentRegistered(e) => (e.facility_id, e.unit_id),
            BloodUnitEvent::ComponentsSeparated(e) => (e.facility_id, e.unit_id),
            BloodUnitEvent::VolumeDeducted(e) => (e.facility_id, e.unit_id),
            BloodUnitEvent::VolumeRestored(e) => (e.facility_id, e.unit_id),
            BloodUnitEvent::StatusUpdated(e) => (e.facility_id, e.unit_id),
        };
        if event_facility != facility_id {
            return Err(UnitLedgerProjectionError::FacilityIsolation(
                "event facility_id does not match envelope facility_id".to_string(),
            ));
        }
        if unit_id.0 != aggregate_id {
            return Err(UnitLedgerProjectionError::FacilityIsolation(
                "event unit_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            BloodUnitEvent::WholeBloodCollected(e) => {
                self.store.upsert(
                    facility_id,
                    e.unit_id,
                    UnitReadModel {
                        unit_id: e.unit_id,
                        donor_id: e.donor_id,
                        blood_type: e.blood_type,
                        component: ComponentType::WholeBlood,
                        total_volume_ml: e.volume_ml,
                        remaining_volume_ml: e.volume_ml,
                        separated: false,
                        parent_unit_id: None,
                        expires_at: e.expires_at,
                        status: UnitStatus::Available,
                        updated_at: e.occurred_at,
                    },
                );
            }
            BloodUnitEvent::ComponentRegistered(e) => {
                self.store.upsert(
                    facility_id,
                    e.unit_id,
                    UnitReadModel {
                        unit_id: e.unit_id,
                        donor_id: e.donor_id,
                        blood_type: e.blood_type,
                        component: e.component,
                        total_volume_ml: e.volume_ml,
                        remaining_volume_ml: e.volume_ml,
                        separated: false,
                        parent_unit_id: Some(e.parent_unit_id),
                        expires_at: e.expires_at,
                        status: UnitStatus::Available,
                        updated_at: e.occurred_at,
                    },
                );
            }
            BloodUnitEvent::ComponentsSeparated(e) => {
                let mut rm = self.require(facility_id, &e.unit_id)?;
                rm.separated = true;
                rm.remaining_volume_ml = 0;
                rm.status = UnitStatus::Used;
                rm.updated_at = e.occurred_at;
                self.store.upsert(facility_id, e.unit_id, rm);
            }
            BloodUnitEvent::VolumeDeducted(e) => {
                let mut rm = self.require(facility_id, &e.unit_id)?;
                rm.remaining_volume_ml = e.new_remaining_ml;
                if rm.remaining_volume_ml == 0 {
                    rm.status = UnitStatus::Used;
                }
                rm.updated_at = e.occurred_at;
                self.store.upsert(facility_id, e.unit_id, rm);
            }
            BloodUnitEvent::VolumeRestored(e) => {
                let mut rm = self.require(facility_id, &e.unit_id)?;
                rm.remaining_volume_ml = e.new_remaining_ml;
                if rm.status == UnitStatus::Used && rm.remaining_volume_ml > 0 {
                    rm.status = UnitStatus::Available;
                }
                rm.updated_at = e.occurred_at;
                self.store.upsert(facility_id, e.unit_id, rm);
            }
            BloodUnitEvent::StatusUpdated(e) => {
                let mut rm = self.require(facility_id, &e.unit_id)?;
                rm.status = e.new;
                rm.updated_at = e.occurred_at;
                self.store.upsert(facility_id, e.unit_id, rm);
            }
        }

        Ok(())
    }

    fn require(
        &self,
        facility_id: FacilityId,
        unit_id: &BloodUnitId,
    ) -> Result<UnitReadModel, UnitLedgerProjectionError> {
        self.store
            .get(facility_id, unit_id)
            .ok_or_else(|| UnitLedgerProjectionError::UnknownUnit(unit_id.to_string()))
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), UnitLedgerProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        // Clear read model per facility before rebuilding.
        {
            let mut facilities = envs.iter().map(|e| e.facility_id()).collect::<Vec<_>>();
            facilities.sort_by_key(|f| *f.as_uuid().as_bytes());
            facilities.dedup();
            for f in facilities {
                self.store.clear_facility(f);
            }
        }

        // Deterministic replay order: facility, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.facility_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
