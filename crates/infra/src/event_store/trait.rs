use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use hemobank_core::{AggregateId, ExpectedVersion, FacilityId};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence
/// number).
///
/// Built from a typed domain event via [`UncommittedEvent::from_typed`],
/// which serializes the payload to JSON and captures the metadata needed to
/// deserialize it again (event type, schema version, business time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub facility_id: FacilityId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are assigned during append, are scoped to one stream
/// (`facility_id` + `aggregate_id`), start at 1, and never change. They give
/// the ordering the audit trails rely on and the version the optimistic
/// concurrency check compares against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub facility_id: FacilityId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into a facility-scoped envelope for publication.
    pub fn to_envelope(&self) -> hemobank_events::EventEnvelope<JsonValue> {
        hemobank_events::EventEnvelope::new(
            self.event_id,
            self.facility_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// Event store operation error.
///
/// Infrastructure failures (storage, concurrency, isolation), distinct from
/// the domain errors the aggregates produce.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("facility isolation violation: {0}")]
    FacilityIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event publication failed: {0}")]
    Publish(String),
}

/// Append-only, facility-scoped event store.
///
/// Streams are keyed by `(facility_id, aggregate_id)`: one stream per blood
/// unit, donor record, donation, or request. Implementations must:
/// - enforce facility isolation on both read and write
/// - enforce optimistic concurrency against the current stream version
///   (this is what makes `deduct`/`approve` race-free: of two concurrent
///   writers, exactly one append can match the expected version)
/// - assign sequence numbers monotonically, with no gaps or duplicates
/// - persist each batch atomically (a separation's status change and plan
///   land together or not at all)
pub trait EventStore: Send + Sync {
    /// Append events to an aggregate stream (append-only).
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for a facility + aggregate.
    ///
    /// Returns an empty vector for a stream that does not exist yet.
    fn load_stream(
        &self,
        facility_id: FacilityId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(
        &self,
        facility_id: FacilityId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(facility_id, aggregate_id)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    ///
    /// Keeps infra decoupled from the domain crates while still capturing
    /// the metadata needed for future deserialization.
    pub fn from_typed<E>(
        facility_id: FacilityId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: hemobank_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            facility_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.schema_version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
