use std::collections::HashMap;
use std::sync::RwLock;

use hemobank_core::{AggregateId, ExpectedVersion, FacilityId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    facility_id: FacilityId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store for tests and embedded deployments.
///
/// One `Vec<StoredEvent>` per `(facility, aggregate)` stream behind a single
/// `RwLock`. The append path holds the write lock across the version check
/// and the insert; that lock span is the per-stream read-modify-write
/// atomicity concurrent deductions rely on. A transactional backend gets
/// the same guarantee from row locking or a conditional insert on
/// `(stream, sequence_number)`.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event of one facility, in deterministic replay order
    /// (aggregate id, then sequence number).
    ///
    /// This is the feed for rebuilding a facility's read models from
    /// scratch; the trait stays append/load-only because production
    /// backends expose replay through their own cursors.
    pub fn load_facility(&self, facility_id: FacilityId) -> Vec<StoredEvent> {
        let streams = match self.streams.read() {
            Ok(s) => s,
            Err(_) => return vec![],
        };

        let mut events: Vec<StoredEvent> = streams
            .iter()
            .filter(|(key, _)| key.facility_id == facility_id)
            .flat_map(|(_, stream)| stream.iter().cloned())
            .collect();
        events.sort_by_key(|e| (*e.aggregate_id.as_uuid().as_bytes(), e.sequence_number));
        events
    }
}

/// The batch must target exactly one stream with one aggregate type.
fn batch_key(events: &[UncommittedEvent]) -> Result<StreamKey, EventStoreError> {
    let first = &events[0];
    for (idx, e) in events.iter().enumerate().skip(1) {
        if e.facility_id != first.facility_id {
            return Err(EventStoreError::FacilityIsolation(format!(
                "append batch spans facilities (index {idx})"
            )));
        }
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "append batch spans aggregate streams (index {idx})"
            )));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "append batch mixes aggregate types (index {idx})"
            )));
        }
    }
    Ok(StreamKey {
        facility_id: first.facility_id,
        aggregate_id: first.aggregate_id,
    })
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let key = batch_key(&events)?;

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("store lock poisoned".to_string()))?;

        let stream = streams.entry(key).or_default();
        let current = stream.last().map(|e| e.sequence_number).unwrap_or(0);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "stream is at version {current}, append expected {expected_version:?}"
            )));
        }

        // A stream never changes its aggregate type after the first append.
        if let Some(existing) = stream.first() {
            if existing.aggregate_type != events[0].aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream holds '{}', append carries '{}'",
                    existing.aggregate_type, events[0].aggregate_type
                )));
            }
        }

        let committed: Vec<StoredEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(e, sequence_number)| StoredEvent {
                event_id: e.event_id,
                facility_id: e.facility_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            })
            .collect();

        stream.extend(committed.iter().cloned());
        Ok(committed)
    }

    fn load_stream(
        &self,
        facility_id: FacilityId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            facility_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("store lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}
