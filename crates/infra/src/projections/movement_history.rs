use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use clinistock_core::{ActorId, AggregateId, ClinicId};
use clinistock_events::EventEnvelope;
use clinistock_inventory::{MovementKind, MovementReason, ProductEvent, ProductId};

use super::ProjectionError;

/// One row in the audit trail: a stock movement as it was committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRecord {
    /// Event id assigned at append time; stable across replays.
    pub movement_id: Uuid,
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity: u64,
    pub delta: i64,
    pub resulting_stock: i64,
    pub reason: MovementReason,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub unit_cost: Option<u64>,
    pub recorded_by: ActorId,
    pub occurred_at: DateTime<Utc>,
    /// Clinic-wide monotonic position; doubles as the pagination cursor.
    pub position: u64,
}

/// Audit trail query parameters. Results are newest-first.
#[derive(Debug, Clone, Default)]
pub struct MovementQuery {
    /// Restrict to one product's movements.
    pub product_id: Option<ProductId>,
    /// Return records strictly before this position (exclusive cursor,
    /// walking backwards in time).
    pub before: Option<u64>,
    /// Maximum records to return. `None` means no limit.
    pub limit: Option<usize>,
}

/// One page of audit trail results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementPage {
    pub records: Vec<MovementRecord>,
    /// Cursor for the next page, absent when this page exhausts the results.
    pub next_cursor: Option<u64>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
struct ClinicHistory {
    records: Vec<MovementRecord>,
    next_position: u64,
}

/// Movement history projection (the queryable audit trail).
///
/// Keeps an append-only, clinic-isolated log of every committed stock
/// movement in commit order. Catalog events share the product streams and
/// advance the cursors but add no rows. Like all read models it is
/// disposable: rebuild replays the stream from scratch.
#[derive(Debug, Default)]
pub struct MovementHistoryProjection {
    histories: RwLock<HashMap<ClinicId, ClinicHistory>>,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl MovementHistoryProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a published envelope into the projection.
    ///
    /// Same delivery contract as the stock levels projection: clinic
    /// isolation enforced, monotonic per-stream sequence enforced, replays
    /// at or below the cursor ignored.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let clinic_id = envelope.clinic_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if let Ok(mut cursors) = self.cursors.write() {
            let key = CursorKey {
                clinic_id,
                aggregate_id,
            };
            let last = *cursors.get(&key).unwrap_or(&0);

            if seq == 0 {
                return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
            }
            if seq <= last {
                return Ok(());
            }
            if seq != last + 1 {
                // Same contract as stock levels: never advance the cursor
                // past a gap.
                return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let event: ProductEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

            let (event_clinic, product_id) = match &event {
                ProductEvent::ProductCreated(e) => (e.clinic_id, e.product_id),
                ProductEvent::ProductUpdated(e) => (e.clinic_id, e.product_id),
                ProductEvent::ProductDeactivated(e) => (e.clinic_id, e.product_id),
                ProductEvent::StockMovementRecorded(e) => (e.clinic_id, e.product_id),
            };

            if event_clinic != clinic_id {
                return Err(ProjectionError::ClinicIsolation(
                    "event clinic_id does not match envelope clinic_id".to_string(),
                ));
            }
            if product_id.0 != aggregate_id {
                return Err(ProjectionError::ClinicIsolation(
                    "event product_id does not match envelope aggregate_id".to_string(),
                ));
            }

            if let ProductEvent::StockMovementRecorded(e) = event {
                if let Ok(mut histories) = self.histories.write() {
                    let history = histories.entry(clinic_id).or_default();
                    history.next_position += 1;
                    history.records.push(MovementRecord {
                        movement_id: envelope.event_id(),
                        product_id: e.product_id,
                        kind: e.kind,
                        quantity: e.quantity,
                        delta: e.delta,
                        resulting_stock: e.resulting_stock,
                        reason: e.reason,
                        description: e.description,
                        reference_number: e.reference_number,
                        unit_cost: e.unit_cost,
                        recorded_by: e.recorded_by,
                        occurred_at: e.occurred_at,
                        position: history.next_position,
                    });
                }
            }

            cursors.insert(key, seq);
        }

        Ok(())
    }

    /// Page through a clinic's audit trail, newest first.
    pub fn list(&self, clinic_id: ClinicId, query: &MovementQuery) -> MovementPage {
        let histories = match self.histories.read() {
            Ok(h) => h,
            Err(_) => {
                return MovementPage {
                    records: vec![],
                    next_cursor: None,
                }
            }
        };

        let Some(history) = histories.get(&clinic_id) else {
            return MovementPage {
                records: vec![],
                next_cursor: None,
            };
        };

        let before = query.before.unwrap_or(u64::MAX);
        let matching = history
            .records
            .iter()
            .rev()
            .filter(|r| r.position < before)
            .filter(|r| query.product_id.is_none_or(|p| r.product_id == p));

        let records: Vec<MovementRecord> = match query.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        };

        // More results exist iff the page was cut short by the limit.
        let next_cursor = match (query.limit, records.last()) {
            (Some(limit), Some(last)) if records.len() == limit => {
                let more = history
                    .records
                    .iter()
                    .filter(|r| r.position < last.position)
                    .any(|r| query.product_id.is_none_or(|p| r.product_id == p));
                more.then_some(last.position)
            }
            _ => None,
        };

        MovementPage {
            records,
            next_cursor,
        }
    }

    /// Count movements recorded at or after `since` (business time).
    pub fn count_since(&self, clinic_id: ClinicId, since: DateTime<Utc>) -> usize {
        let histories = match self.histories.read() {
            Ok(h) => h,
            Err(_) => return 0,
        };

        histories
            .get(&clinic_id)
            .map(|h| h.records.iter().filter(|r| r.occurred_at >= since).count())
            .unwrap_or(0)
    }

    /// Rebuild the audit trail from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut clinics = envs.iter().map(|e| e.clinic_id()).collect::<Vec<_>>();
            clinics.sort_by_key(|c| *c.as_uuid().as_bytes());
            clinics.dedup();
            if let Ok(mut histories) = self.histories.write() {
                for c in clinics {
                    histories.remove(&c);
                }
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.clinic_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
