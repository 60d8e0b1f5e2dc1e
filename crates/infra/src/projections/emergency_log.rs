use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use hemobank_core::{AggregateId, FacilityId, StaffId};
use hemobank_emergency::{RequestEvent, RequestId, RequestStatus};
use hemobank_events::EventEnvelope;

use crate::read_model::FacilityStore;

/// One entry in an emergency request's status trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyLogEntry {
    pub log_id: Uuid,
    pub request_id: RequestId,
    /// `None` for the submission entry.
    pub previous: Option<RequestStatus>,
    pub new: RequestStatus,
    /// Deciding staff member; `None` for the submission entry.
    pub staff: Option<StaffId>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Status trail of one emergency request (ordered oldest-first).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EmergencyRequestLog {
    pub entries: Vec<EmergencyLogEntry>,
}

impl EmergencyRequestLog {
    pub fn status_walk(&self) -> Vec<RequestStatus> {
        self.entries.iter().map(|e| e.new).collect()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    facility_id: FacilityId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum EmergencyLogProjectionError {
    #[error("failed to deserialize request event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Audit trail projection for emergency requests.
#[derive(Debug)]
pub struct EmergencyLogProjection<S>
where
    S: FacilityStore<RequestId, EmergencyRequestLog>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> EmergencyLogProjection<S>
where
    S: FacilityStore<RequestId, EmergencyRequestLog>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn history(&self, facility_id: FacilityId, request_id: &RequestId) -> Vec<EmergencyLogEntry> {
        self.store
            .get(facility_id, request_id)
            .map(|log| log.entries)
            .unwrap_or_default()
    }

    pub fn status_walk(
        &self,
        facility_id: FacilityId,
        request_id: &RequestId,
    ) -> Vec<RequestStatus> {
        self.store
            .get(facility_id, request_id)
            .map(|log| log.status_walk())
            .unwrap_or_default()
    }

    /// Apply a published envelope into the projection (idempotent).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), EmergencyLogProjectionError> {
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
            return Err(EmergencyLogProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: RequestEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| EmergencyLogProjectionError::Deserialize(e.to_string()))?;

        let (request_id, entry) = match &ev {
            RequestEvent::RequestSubmitted(e) => (
                e.request_id,
                EmergencyLogEntry {
                    log_id: envelope.event_id(),
                    request_id: e.request_id,
                    previous: None,
                    new: RequestStatus::Pending,
                    staff: None,
                    note: None,
                    occurred_at: e.occurred_at,
                },
            ),
            RequestEvent::RequestApproved(e) => (
                e.request_id,
                EmergencyLogEntry {
                    log_id: envelope.event_id(),
                    request_id: e.request_id,
                    previous: Some(e.previous),
                    new: RequestStatus::Approved,
                    staff: Some(e.staff),
                    note: Some(format!(
                        "allocated {} ml from unit {}",
                        e.used_volume_ml, e.unit_id
                    )),
                    occurred_at: e.occurred_at,
                },
            ),
            RequestEvent::RequestRejected(e) => (
                e.request_id,
                EmergencyLogEntry {
                    log_id: envelope.event_id(),
                    request_id: e.request_id,
                    previous: Some(e.previous),
                    new: RequestStatus::Rejected,
                    staff: Some(e.staff),
                    note: Some(e.reason.clone()),
                    occurred_at: e.occurred_at,
                },
            ),
            RequestEvent::ContactsProvided(e) => (
                e.request_id,
                EmergencyLogEntry {
                    log_id: envelope.event_id(),
                    request_id: e.request_id,
                    previous: Some(e.previous),
                    new: RequestStatus::ContactsProvided,
                    staff: Some(e.staff),
                    note: Some(format!("{} donor(s) suggested", e.donors.len())),
                    occurred_at: e.occurred_at,
                },
            ),
        };

        let mut log = self.store.get(facility_id, &request_id).unwrap_or_default();
        log.entries.push(entry);
        self.store.upsert(facility_id, request_id, log);

        cursors.insert(key, seq);
        Ok(())
    }
}
