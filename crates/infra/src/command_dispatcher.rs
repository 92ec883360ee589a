//! Command execution pipeline (application-level orchestration).
//!
//! Implements the command dispatch pattern for event-sourced aggregates:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (clinic-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (projections, notifications)
//! ```
//!
//! Two concerns live here rather than in domain code:
//!
//! - **Conflict retry**: when a concurrent append changes the stream between
//!   load and append, the whole pipeline is re-run against the fresh stream,
//!   up to a small bounded number of attempts. Domain rejections are never
//!   retried (re-running a rejected command against the same state is
//!   pointless), only store-level version races are.
//! - **Idempotent dispatch**: commands may carry a caller-supplied request
//!   id. A request id already seen for the clinic returns the originally
//!   committed events without touching the store, so transport-level retries
//!   cannot double-apply a movement. A retry arriving while the original is
//!   still in flight waits for it instead of racing it.
//! - **Publication order**: append and publish run under a per-stream guard,
//!   so envelopes reach the bus in commit order and the projections'
//!   sequence cursors never see reordered events from concurrent writers.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use clinistock_core::{Aggregate, AggregateId, ClinicId, DomainError, ExpectedVersion};
use clinistock_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Maximum pipeline re-runs on an optimistic concurrency failure.
const MAX_DISPATCH_ATTEMPTS: u32 = 3;

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure that survived all retry attempts.
    Concurrency(String),
    /// Clinic isolation violation (cross-clinic or cross-aggregate stream mixing).
    ClinicIsolation(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// A movement would take stock below zero.
    InsufficientStock { requested: u64, available: i64 },
    /// The operation is not allowed through this path.
    InvalidOperation(String),
    /// Domain-level conflict (duplicate creation, stale state, etc.).
    Conflict(String),
    /// Domain-level not found.
    NotFound,
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; the
    /// events are durable and can be republished).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::ClinicIsolation(msg) => DispatchError::ClinicIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InsufficientStock {
                requested,
                available,
            } => DispatchError::InsufficientStock {
                requested,
                available,
            },
            DomainError::InvalidOperation(msg) => DispatchError::InvalidOperation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// One request id's dispatch result. `None` while the first dispatch is in
/// flight; a concurrent retry blocks on the slot's lock until it resolves.
type RequestSlot = Arc<Mutex<Option<Vec<StoredEvent>>>>;

/// Reusable command execution engine for event-sourced aggregates.
///
/// Sits between the HTTP layer and the store/bus. Events are persisted
/// before publication: if the append fails nothing is published, and if
/// publication fails the events are already durable. Generic over the store
/// and bus so tests run against the in-memory implementations.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    /// Dispatch results keyed by (clinic, request id). Entries live for the
    /// life of the process; a persistent backend would add TTL eviction.
    completed: Mutex<HashMap<(ClinicId, Uuid), RequestSlot>>,
    /// Per-stream guards held across append + publish, so envelopes reach
    /// the bus in commit order.
    stream_guards: Mutex<HashMap<(ClinicId, AggregateId), Arc<Mutex<()>>>>,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            completed: Mutex::new(HashMap::new()),
            stream_guards: Mutex::new(HashMap::new()),
        }
    }

    fn request_slot(
        &self,
        clinic_id: ClinicId,
        request_id: Uuid,
    ) -> Result<RequestSlot, DispatchError> {
        let mut map = self.completed.lock().map_err(|_| lock_poisoned())?;
        Ok(map.entry((clinic_id, request_id)).or_default().clone())
    }

    fn stream_guard(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
    ) -> Result<Arc<Mutex<()>>, DispatchError> {
        let mut map = self.stream_guards.lock().map_err(|_| lock_poisoned())?;
        Ok(map.entry((clinic_id, aggregate_id)).or_default().clone())
    }
}

fn lock_poisoned() -> DispatchError {
    DispatchError::Store(EventStoreError::InvalidAppend(
        "dispatcher lock poisoned".to_string(),
    ))
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// - `clinic_id` scopes every step (load, append, publish).
    /// - `make_aggregate` creates the empty instance to rehydrate; the
    ///   dispatcher stays generic over aggregate types this way.
    /// - `request_id`, when present, makes the dispatch idempotent: a
    ///   repeated request id returns the events committed the first time.
    ///
    /// Returns the committed events with their assigned sequence numbers.
    pub fn dispatch<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        request_id: Option<Uuid>,
        make_aggregate: impl Fn(ClinicId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: clinistock_events::Event + Serialize + DeserializeOwned,
    {
        // Idempotency: reserve the (clinic, request id) slot before running
        // the pipeline. A concurrent retry of the same request blocks on the
        // slot until the first dispatch resolves, then observes its result
        // instead of racing it into a second append.
        let slot = match request_id {
            Some(request_id) => Some(self.request_slot(clinic_id, request_id)?),
            None => None,
        };
        let mut slot_guard = None;
        if let Some(slot) = &slot {
            let guard = slot.lock().map_err(|_| lock_poisoned())?;
            if let Some(prior) = guard.as_ref() {
                tracing::debug!(%clinic_id, "duplicate request id, returning prior result");
                return Ok(prior.clone());
            }
            slot_guard = Some(guard);
        }

        let aggregate_type = aggregate_type.into();
        let mut attempt = 1;

        // Append + publish run under the stream guard: per-stream
        // publication order must match commit order, or the projections'
        // sequence cursors see gaps.
        let stream_guard = self.stream_guard(clinic_id, aggregate_id)?;
        let _ordering = stream_guard.lock().map_err(|_| lock_poisoned())?;

        let committed = loop {
            match self.dispatch_once(
                clinic_id,
                aggregate_id,
                &aggregate_type,
                &command,
                &make_aggregate,
            ) {
                Ok(committed) => break committed,
                // Another writer won the race: re-run against the fresh
                // stream so per-product movements serialize.
                Err(DispatchError::Concurrency(msg)) if attempt < MAX_DISPATCH_ATTEMPTS => {
                    tracing::debug!(%clinic_id, %aggregate_id, attempt, "concurrency conflict, retrying: {msg}");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        // 5) Publish committed events (after append).
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        if let Some(guard) = slot_guard.as_mut() {
            **guard = Some(committed.clone());
        }

        Ok(committed)
    }

    fn dispatch_once<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: &impl Fn(ClinicId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: clinistock_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (clinic-scoped).
        let history = self.store.load_stream(clinic_id, aggregate_id)?;
        validate_loaded_stream(clinic_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate.
        let mut aggregate = make_aggregate(clinic_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation).
        let decided = aggregate.handle(command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic).
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    clinic_id,
                    aggregate_id,
                    aggregate_type,
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self.store.append(uncommitted, expected)?)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce clinic isolation even if a buggy backend returns cross-clinic
    // data, and ensure the stream is strictly increasing by sequence number.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.clinic_id != clinic_id {
            return Err(DispatchError::ClinicIsolation(format!(
                "loaded stream contains wrong clinic_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::ClinicIsolation(format!(
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
