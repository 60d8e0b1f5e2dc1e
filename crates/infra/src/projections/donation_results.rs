use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use hemobank_core::{AggregateId, FacilityId};
use hemobank_donation::{DonationEvent, DonationId, DonationResult};
use hemobank_events::EventEnvelope;

use crate::read_model::FacilityStore;

/// Queryable result per completed donation (1:1 with the donation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationResultReadModel {
    pub donation_id: DonationId,
    pub result: DonationResult,
    pub recorded_at: DateTime<Utc>,
    /// True once staff have corrected the originally recorded result.
    pub corrected: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    facility_id: FacilityId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum DonationResultsProjectionError {
    #[error("failed to deserialize donation event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Donation results projection.
#[derive(Debug)]
pub struct DonationResultsProjection<S>
where
    S: FacilityStore<DonationId, DonationResultReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> DonationResultsProjection<S>
where
    S: FacilityStore<DonationId, DonationResultReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(
        &self,
        facility_id: FacilityId,
        donation_id: &DonationId,
    ) -> Option<DonationResultReadModel> {
        self.store.get(facility_id, donation_id)
    }

    /// Apply a published envelope into the projection (idempotent).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), DonationResultsProjectionError> {
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
            return Err(DonationResultsProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: DonationEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| DonationResultsProjectionError::Deserialize(e.to_string()))?;

        match &ev {
            DonationEvent::DonationResultRecorded(e) => {
                self.store.upsert(
                    facility_id,
                    e.donation_id,
                    DonationResultReadModel {
                        donation_id: e.donation_id,
                        result: e.result.clone(),
                        recorded_at: e.occurred_at,
                        corrected: false,
                    },
                );
            }
            DonationEvent::DonationResultCorrected(e) => {
                let recorded_at = self
                    .store
                    .get(facility_id, &e.donation_id)
                    .map(|rm| rm.recorded_at)
                    .unwrap_or(e.occurred_at);
                self.store.upsert(
                    facility_id,
                    e.donation_id,
                    DonationResultReadModel {
                        donation_id: e.donation_id,
                        result: e.result.clone(),
                        recorded_at,
                        corrected: true,
                    },
                );
            }
            DonationEvent::DonationSubmitted(_) | DonationEvent::DonationStatusChanged(_) => {}
        }

        cursors.insert(key, seq);
        Ok(())
    }
}
