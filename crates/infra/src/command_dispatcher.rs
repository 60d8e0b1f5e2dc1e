//! Command execution pipeline (application-level orchestration).
//!
//! Every workflow mutation goes through the same lifecycle:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (facility-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply history to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to the bus (projections, external consumers)
//! ```
//!
//! Steps 1–4 are the atomic read-modify-write the ledger requires: the
//! expected version captured at load time means a concurrent writer to the
//! same unit or request invalidates this append, and exactly one of two
//! racing callers succeeds. Publication happens only after a successful
//! append; a publish failure surfaces to the caller but the facts are
//! already durable (at-least-once delivery downstream).
//!
//! This module contains no IO itself; it composes the store and bus traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use hemobank_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, FacilityId};
use hemobank_events::EventBus;

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (e.g. stale aggregate version).
    Concurrency(String),
    /// Facility isolation violation (cross-facility or cross-aggregate
    /// stream mixing).
    FacilityIsolation(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Domain invariant failure (deterministic).
    InvariantViolation(String),
    /// Requested state change is not an edge of the transition table.
    InvalidTransition { from: String, to: String },
    /// Requested deduction/allocation exceeds available or permitted volume.
    InsufficientVolume {
        requested_ml: u32,
        available_ml: u32,
    },
    /// Acting party is not eligible for the operation.
    Forbidden(String),
    /// Domain-level not found.
    NotFound,
    /// Failed to deserialize historical event payloads into the aggregate
    /// event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry
    /// may duplicate).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::FacilityIsolation(msg) => {
                DispatchError::FacilityIsolation(msg.clone())
            }
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::InvalidTransition { from, to } => {
                DispatchError::InvalidTransition { from, to }
            }
            DomainError::InsufficientVolume {
                requested_ml,
                available_ml,
            } => DispatchError::InsufficientVolume {
                requested_ml,
                available_ml,
            },
            DomainError::Forbidden(msg) => DispatchError::Forbidden(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run against the in-memory pair
/// and production wires a transactional backend without touching domain
/// code. One dispatcher instance serves every aggregate type; the
/// `make_aggregate` factory passed per call controls construction.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<JsonValue>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// Returns the committed events (with assigned sequence numbers) on
    /// success. On `DispatchError::Concurrency` the caller may reload and
    /// retry, or surface the conflict.
    pub fn dispatch<A>(
        &self,
        facility_id: FacilityId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(FacilityId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: hemobank_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (facility-scoped)
        let history = self.store.load_stream(facility_id, aggregate_id)?;
        validate_loaded_stream(facility_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(facility_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    facility_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Load and rehydrate an aggregate without dispatching a command.
    ///
    /// Application services use this to read authoritative current state
    /// (pre-validation, returning updated entities to callers) instead of
    /// going through the eventually-consistent read models.
    pub fn rehydrate<A>(
        &self,
        facility_id: FacilityId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(FacilityId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(facility_id, aggregate_id)?;
        validate_loaded_stream(facility_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(facility_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    facility_id: FacilityId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce facility isolation even if a buggy backend returns foreign
    // data, and require monotonically increasing sequence numbers.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.facility_id != facility_id {
            return Err(DispatchError::FacilityIsolation(format!(
                "loaded stream contains wrong facility_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::FacilityIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
