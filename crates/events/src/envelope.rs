use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hemobank_core::{AggregateId, FacilityId};

/// A committed event together with the stream metadata consumers need.
///
/// Envelopes are what the bus carries after a successful append: the
/// "status changed" notifications external consumers (notification senders,
/// reporting) subscribe to, and the input the projections build the audit
/// trails and read models from.
///
/// The metadata answers the questions the payload alone cannot: which
/// facility the fact belongs to (nothing downstream may mix facilities),
/// which stream it came from (`aggregate_id` + `aggregate_type`), and where
/// in that stream it sits (`sequence_number`, assigned at append time,
/// strictly increasing and gap-free). `occurred_at` duplicates the
/// payload's business time so consumers can order and filter without
/// decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    facility_id: FacilityId,
    aggregate_id: AggregateId,
    aggregate_type: String,
    sequence_number: u64,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        facility_id: FacilityId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            facility_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn facility_id(&self) -> FacilityId {
        self.facility_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Position in the aggregate stream (1-based, strictly increasing).
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Business time of the wrapped fact.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
