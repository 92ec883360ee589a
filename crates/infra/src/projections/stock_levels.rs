use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use clinistock_core::{AggregateId, ClinicId};
use clinistock_events::EventEnvelope;
use clinistock_inventory::{ProductCategory, ProductEvent, ProductId, StockStatus, stock_status};

use super::ProjectionError;
use crate::read_model::ClinicStore;

/// Queryable catalog read model: one row per product with its current stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub supplier: Option<String>,
    pub unit_of_measure: String,
    pub unit_price: Option<u64>,
    pub barcode: Option<String>,
    pub min_stock: i64,
    pub current_stock: i64,
    pub active: bool,
}

impl ProductReadModel {
    /// Stock health, derived at read time (never stored).
    pub fn status(&self) -> StockStatus {
        stock_status(self.current_stock, self.min_stock)
    }
}

/// Clinic+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
}

/// Stock levels projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a
/// clinic-isolated read model of the product catalog and its current stock.
/// Read models are disposable and rebuildable from the event stream.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: ClinicStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> StockLevelsProjection<S>
where
    S: ClinicStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query read model for one clinic/product.
    pub fn get(&self, clinic_id: ClinicId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(clinic_id, product_id)
    }

    /// List all products for a clinic.
    pub fn list(&self, clinic_id: ClinicId) -> Vec<ProductReadModel> {
        self.store.list(clinic_id)
    }

    /// List active products whose status is `low` or `out_of_stock`.
    pub fn list_below_minimum(&self, clinic_id: ClinicId) -> Vec<ProductReadModel> {
        self.store
            .list(clinic_id)
            .into_iter()
            .filter(|p| p.active && p.status() != StockStatus::Normal)
            .collect()
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces clinic isolation
    /// - Enforces monotonic sequence per (clinic, aggregate) stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let clinic_id = envelope.clinic_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        // Cursor check (per clinic + aggregate stream).
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
                // Duplicate or replay; safe to ignore.
                return Ok(());
            }

            if seq != last + 1 {
                // Out-of-order delivery. Reject without advancing the cursor
                // so the event still applies once the gap fills (redelivery
                // or rebuild); a fresh stream must start at sequence 1.
                return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let event: ProductEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

            // Validate clinic isolation at the event level.
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

            match event {
                ProductEvent::ProductCreated(e) => {
                    self.store.upsert(
                        clinic_id,
                        e.product_id,
                        ProductReadModel {
                            product_id: e.product_id,
                            name: e.name,
                            description: e.description,
                            category: e.category,
                            supplier: e.supplier,
                            unit_of_measure: e.unit_of_measure,
                            unit_price: e.unit_price,
                            barcode: e.barcode,
                            min_stock: e.min_stock,
                            current_stock: 0,
                            active: true,
                        },
                    );
                }
                ProductEvent::ProductUpdated(e) => {
                    if let Some(mut rm) = self.store.get(clinic_id, &e.product_id) {
                        if let Some(name) = e.name {
                            rm.name = name;
                        }
                        if let Some(description) = e.description {
                            rm.description = Some(description);
                        }
                        if let Some(category) = e.category {
                            rm.category = category;
                        }
                        if let Some(supplier) = e.supplier {
                            rm.supplier = Some(supplier);
                        }
                        if let Some(unit) = e.unit_of_measure {
                            rm.unit_of_measure = unit;
                        }
                        if let Some(price) = e.unit_price {
                            rm.unit_price = Some(price);
                        }
                        if let Some(barcode) = e.barcode {
                            rm.barcode = Some(barcode);
                        }
                        if let Some(min_stock) = e.min_stock {
                            rm.min_stock = min_stock;
                        }
                        self.store.upsert(clinic_id, e.product_id, rm);
                    }
                }
                ProductEvent::ProductDeactivated(e) => {
                    if let Some(mut rm) = self.store.get(clinic_id, &e.product_id) {
                        rm.active = false;
                        self.store.upsert(clinic_id, e.product_id, rm);
                    }
                }
                ProductEvent::StockMovementRecorded(e) => {
                    if let Some(mut rm) = self.store.get(clinic_id, &e.product_id) {
                        rm.current_stock += e.delta;
                        self.store.upsert(clinic_id, e.product_id, rm);
                    }
                }
            }

            // Advance cursor after successful apply.
            cursors.insert(key, seq);
        }

        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        // Clear read model per clinic before rebuilding.
        {
            let mut clinics = envs.iter().map(|e| e.clinic_id()).collect::<Vec<_>>();
            clinics.sort_by_key(|c| *c.as_uuid().as_bytes());
            clinics.dedup();
            for c in clinics {
                self.store.clear_clinic(c);
            }
        }

        // Deterministic replay order: clinic, aggregate, sequence.
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
