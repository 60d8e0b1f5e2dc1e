use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use hemobank_core::{Actor, AggregateId, FacilityId};
use hemobank_donation::{DonationEvent, DonationId, DonationStatus};
use hemobank_events::EventEnvelope;

use crate::read_model::FacilityStore;

/// One entry in a donation's status trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationLogEntry {
    pub log_id: Uuid,
    pub donation_id: DonationId,
    /// `None` for the submission entry.
    pub previous: Option<DonationStatus>,
    pub new: DonationStatus,
    /// `None` for the submission entry (the donor submits implicitly).
    pub actor: Option<Actor>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Status trail of one campaign donation (ordered oldest-first).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CampaignDonationLog {
    pub entries: Vec<DonationLogEntry>,
}

impl CampaignDonationLog {
    /// The sequence of statuses this donation has walked through.
    pub fn status_walk(&self) -> Vec<DonationStatus> {
        let mut walk = Vec::with_capacity(self.entries.len());
        for e in &self.entries {
            walk.push(e.new);
        }
        walk
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    facility_id: FacilityId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum DonationLogProjectionError {
    #[error("failed to deserialize donation event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Audit trail projection for campaign donations: one entry per status
/// transition, with actor and optional note.
#[derive(Debug)]
pub struct DonationLogProjection<S>
where
    S: FacilityStore<DonationId, CampaignDonationLog>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> DonationLogProjection<S>
where
    S: FacilityStore<DonationId, CampaignDonationLog>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn history(&self, facility_id: FacilityId, donation_id: &DonationId) -> Vec<DonationLogEntry> {
        self.store
            .get(facility_id, donation_id)
            .map(|log| log.entries)
            .unwrap_or_default()
    }

    pub fn status_walk(
        &self,
        facility_id: FacilityId,
        donation_id: &DonationId,
    ) -> Vec<DonationStatus> {
        self.store
            .get(facility_id, donation_id)
            .map(|log| log.status_walk())
            .unwrap_or_default()
    }

    /// Apply a published envelope into the projection (idempotent).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), DonationLogProjectionError> {
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
            return Err(DonationLogProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: DonationEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| DonationLogProjectionError::Deserialize(e.to_string()))?;

        let entry = match &ev {
            DonationEvent::DonationSubmitted(e) => Some((
                e.donation_id,
                DonationLogEntry {
                    log_id: envelope.event_id(),
                    donation_id: e.donation_id,
                    previous: None,
                    new: DonationStatus::Pending,
                    actor: None,
                    note: None,
                    occurred_at: e.occurred_at,
                },
            )),
            DonationEvent::DonationStatusChanged(e) => Some((
                e.donation_id,
                DonationLogEntry {
                    log_id: envelope.event_id(),
                    donation_id: e.donation_id,
                    previous: Some(e.previous),
                    new: e.new,
                    actor: Some(e.actor),
                    note: e.note.clone(),
                    occurred_at: e.occurred_at,
                },
            )),
            // Result events are tracked by the results projection.
            DonationEvent::DonationResultRecorded(_)
            | DonationEvent::DonationResultCorrected(_) => None,
        };

        if let Some((donation_id, entry)) = entry {
            let mut log = self.store.get(facility_id, &donation_id).unwrap_or_default();
            log.entries.push(entry);
            self.store.upsert(facility_id, donation_id, log);
        }

        cursors.insert(key, seq);
        Ok(())
    }
}
