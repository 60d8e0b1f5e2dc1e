use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use hemobank_core::{AccountId, AggregateId, FacilityId};
use hemobank_emergency::{RequestEvent, RequestId, RequestStatus, RequesterKind};
use hemobank_events::EventEnvelope;
use hemobank_inventory::BloodUnitId;
use hemobank_typing::{BloodType, ComponentType};

use crate::read_model::FacilityStore;

/// Queryable board of emergency requests: current state per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestReadModel {
    pub request_id: RequestId,
    pub requester: AccountId,
    pub requester_kind: RequesterKind,
    pub blood_type: BloodType,
    pub component: Option<ComponentType>,
    pub required_volume_ml: u32,
    pub used_volume_ml: u32,
    pub assigned_unit_id: Option<BloodUnitId>,
    pub status: RequestStatus,
    pub rejection_reason: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequestReadModel {
    pub fn effective_component(&self) -> ComponentType {
        self.component.unwrap_or(ComponentType::WholeBlood)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    facility_id: FacilityId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum EmergencyBoardProjectionError {
    #[error("failed to deserialize request event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("event for unknown request: {0}")]
    UnknownRequest(String),
}

/// Emergency request board projection.
///
/// Backs the bulk-reject sweep and request queries: which hospital requests
/// for a given blood type/component are still pending.
#[derive(Debug)]
pub struct EmergencyBoardProjection<S>
where
    S: FacilityStore<RequestId, RequestReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> EmergencyBoardProjection<S>
where
    S: FacilityStore<RequestId, RequestReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, facility_id: FacilityId, request_id: &RequestId) -> Option<RequestReadModel> {
        self.store.get(facility_id, request_id)
    }

    pub fn list(&self, facility_id: FacilityId) -> Vec<RequestReadModel> {
        self.store.list(facility_id)
    }

    /// Pending hospital requests matching a blood type and component.
    pub fn pending_hospital_requests(
        &self,
        facility_id: FacilityId,
        blood_type: BloodType,
        component: Option<ComponentType>,
    ) -> Vec<RequestReadModel> {
        let wanted = component.unwrap_or(ComponentType::WholeBlood);
        let mut matching: Vec<_> = self
            .store
            .list(facility_id)
            .into_iter()
            .filter(|r| {
                r.status == RequestStatus::Pending
                    && r.requester_kind == RequesterKind::Hospital
                    && r.blood_type == blood_type
                    && r.effective_component() == wanted
            })
            .collect();
        matching.sort_by_key(|r| r.starts_at);
        matching
    }

    /// Apply a published envelope into the projection (idempotent).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), EmergencyBoardProjectionError> {
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
            return Err(EmergencyBoardProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: RequestEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| EmergencyBoardProjectionError::Deserialize(e.to_string()))?;

        match &ev {
            RequestEvent::RequestSubmitted(e) => {
                self.store.upsert(
                    facility_id,
                    e.request_id,
                    RequestReadModel {
                        request_id: e.request_id,
                        requester: e.requester,
                        requester_kind: e.requester_kind,
                        blood_type: e.blood_type,
                        component: e.component,
                        required_volume_ml: e.required_volume_ml,
                        used_volume_ml: 0,
                        assigned_unit_id: None,
                        status: RequestStatus::Pending,
                        rejection_reason: None,
                        starts_at: e.starts_at,
                        ends_at: e.ends_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            RequestEvent::RequestApproved(e) => {
                let mut rm = self.require(facility_id, &e.request_id)?;
                rm.status = RequestStatus::Approved;
                rm.used_volume_ml = e.used_volume_ml;
                rm.assigned_unit_id = Some(e.unit_id);
                rm.updated_at = e.occurred_at;
                self.store.upsert(facility_id, e.request_id, rm);
            }
            RequestEvent::RequestRejected(e) => {
                let mut rm = self.require(facility_id, &e.request_id)?;
                rm.status = RequestStatus::Rejected;
                rm.rejection_reason = Some(e.reason.clone());
                rm.updated_at = e.occurred_at;
                self.store.upsert(facility_id, e.request_id, rm);
            }
            RequestEvent::ContactsProvided(e) => {
                let mut rm = self.require(facility_id, &e.request_id)?;
                rm.status = RequestStatus::ContactsProvided;
                rm.updated_at = e.occurred_at;
                self.store.upsert(facility_id, e.request_id, rm);
            }
        }

        cursors.insert(key, seq);
        Ok(())
    }

    fn require(
        &self,
        facility_id: FacilityId,
        request_id: &RequestId,
    ) -> Result<RequestReadModel, EmergencyBoardProjectionError> {
        self.store
            .get(facility_id, request_id)
            .ok_or_else(|| EmergencyBoardProjectionError::UnknownRequest(request_id.to_string()))
    }
}
