use std::collections::HashMap;
use std::sync::RwLock;

use clinistock_core::{AggregateId, ClinicId, ExpectedVersion};

use super::query::EventQuery;
use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
}

/// HashMap-backed event store for the in-memory runtime and tests.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// A batch commits atomically, so all of it must target one stream.
    fn batch_key(events: &[UncommittedEvent]) -> Result<(StreamKey, &str), EventStoreError> {
        let first = &events[0];
        let key = StreamKey {
            clinic_id: first.clinic_id,
            aggregate_id: first.aggregate_id,
        };

        for (idx, e) in events.iter().enumerate() {
            if e.clinic_id != key.clinic_id {
                return Err(EventStoreError::ClinicIsolation(format!(
                    "batch contains multiple clinic_ids (index {idx})"
                )));
            }
            if e.aggregate_id != key.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != first.aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        Ok((key, &first.aggregate_type))
    }
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

        let (key, aggregate_type) = Self::batch_key(&events)?;
        let aggregate_type = aggregate_type.to_string();

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let stream = streams.entry(key).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // A stream never changes aggregate type once created.
        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        let committed: Vec<StoredEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(e, seq)| e.into_stored(seq))
            .collect();

        stream.extend(committed.iter().cloned());
        Ok(committed)
    }

    fn load_stream(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            clinic_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}

impl EventQuery for InMemoryEventStore {
    fn load_clinic(&self, clinic_id: ClinicId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let mut events: Vec<StoredEvent> = streams
            .iter()
            .filter(|(key, _)| key.clinic_id == clinic_id)
            .flat_map(|(_, stream)| stream.iter().cloned())
            .collect();

        // Deterministic replay order: aggregate, then sequence.
        events.sort_by_key(|e| (*e.aggregate_id.as_uuid().as_bytes(), e.sequence_number));

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn uncommitted(clinic_id: ClinicId, aggregate_id: AggregateId) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            clinic_id,
            aggregate_id,
            aggregate_type: "inventory.product".to_string(),
            event_type: "test.event".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({}),
        }
    }

    #[test]
    fn append_assigns_contiguous_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let clinic = ClinicId::new();
        let agg = AggregateId::new();

        let first = store
            .append(
                vec![uncommitted(clinic, agg), uncommitted(clinic, agg)],
                ExpectedVersion::Exact(0),
            )
            .unwrap();
        assert_eq!(first[0].sequence_number, 1);
        assert_eq!(first[1].sequence_number, 2);

        let second = store
            .append(vec![uncommitted(clinic, agg)], ExpectedVersion::Exact(2))
            .unwrap();
        assert_eq!(second[0].sequence_number, 3);
    }

    #[test]
    fn stale_expected_version_is_a_concurrency_error() {
        let store = InMemoryEventStore::new();
        let clinic = ClinicId::new();
        let agg = AggregateId::new();

        store
            .append(vec![uncommitted(clinic, agg)], ExpectedVersion::Exact(0))
            .unwrap();

        let err = store
            .append(vec![uncommitted(clinic, agg)], ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn mixed_clinic_batch_is_rejected() {
        let store = InMemoryEventStore::new();
        let agg = AggregateId::new();

        let err = store
            .append(
                vec![
                    uncommitted(ClinicId::new(), agg),
                    uncommitted(ClinicId::new(), agg),
                ],
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::ClinicIsolation(_)));
    }

    #[test]
    fn stream_aggregate_type_is_stable() {
        let store = InMemoryEventStore::new();
        let clinic = ClinicId::new();
        let agg = AggregateId::new();

        store
            .append(vec![uncommitted(clinic, agg)], ExpectedVersion::Exact(0))
            .unwrap();

        let mut other = uncommitted(clinic, agg);
        other.aggregate_type = "something.else".to_string();
        let err = store
            .append(vec![other], ExpectedVersion::Exact(1))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn load_clinic_only_returns_that_clinic_in_replay_order() {
        let store = InMemoryEventStore::new();
        let clinic = ClinicId::new();
        let other_clinic = ClinicId::new();
        let agg_a = AggregateId::new();
        let agg_b = AggregateId::new();

        store
            .append(vec![uncommitted(clinic, agg_a)], ExpectedVersion::Exact(0))
            .unwrap();
        store
            .append(
                vec![uncommitted(clinic, agg_b), uncommitted(clinic, agg_b)],
                ExpectedVersion::Exact(0),
            )
            .unwrap();
        store
            .append(
                vec![uncommitted(other_clinic, agg_a)],
                ExpectedVersion::Exact(0),
            )
            .unwrap();

        let events = store.load_clinic(clinic).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.clinic_id == clinic));

        // Within an aggregate, sequence order holds.
        let b_events: Vec<_> = events
            .iter()
            .filter(|e| e.aggregate_id == agg_b)
            .collect();
        assert_eq!(b_events[0].sequence_number, 1);
        assert_eq!(b_events[1].sequence_number, 2);
    }
}
