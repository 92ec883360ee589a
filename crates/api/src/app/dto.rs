use serde::Deserialize;

use clinistock_infra::event_store::StoredEvent;
use clinistock_infra::projections::{MovementRecord, ProductReadModel};
use clinistock_inventory::{MovementKind, MovementReason, ProductCategory, ProductEvent};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub supplier: Option<String>,
    pub unit_of_measure: String,
    pub unit_price: Option<u64>,
    pub barcode: Option<String>,
    #[serde(default)]
    pub min_stock: i64,
    /// Initial quantity, recorded as an opening adjustment movement.
    #[serde(default, alias = "current_stock")]
    pub opening_stock: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<ProductCategory>,
    pub supplier: Option<String>,
    pub unit_of_measure: Option<String>,
    pub unit_price: Option<u64>,
    pub barcode: Option<String>,
    pub min_stock: Option<i64>,
    /// Deserialized only so the handler can reject direct stock writes with
    /// a clear error instead of silently ignoring the field.
    pub current_stock: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RecordMovementRequest {
    pub product_id: String,
    #[serde(rename = "type")]
    pub kind: MovementKind,
    pub quantity: u64,
    pub reason: MovementReason,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub unit_cost: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    pub product_id: String,
    pub new_quantity: i64,
    pub reason: Option<MovementReason>,
    pub description: Option<String>,
    pub reference_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MovementListParams {
    pub product_id: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<u64>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn product_to_json(rm: ProductReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.product_id.0.to_string(),
        "name": rm.name,
        "description": rm.description,
        "category": rm.category,
        "supplier": rm.supplier,
        "unit_of_measure": rm.unit_of_measure,
        "unit_price": rm.unit_price,
        "barcode": rm.barcode,
        "min_stock": rm.min_stock,
        "current_stock": rm.current_stock,
        "status": rm.status(),
        "active": rm.active,
    })
}

pub fn movement_to_json(r: &MovementRecord) -> serde_json::Value {
    serde_json::json!({
        "id": r.movement_id.to_string(),
        "product_id": r.product_id.0.to_string(),
        "type": r.kind,
        "quantity": r.quantity,
        "delta": r.delta,
        "resulting_stock": r.resulting_stock,
        "reason": r.reason,
        "description": r.description,
        "reference_number": r.reference_number,
        "unit_cost": r.unit_cost,
        "recorded_by": r.recorded_by.to_string(),
        "occurred_at": r.occurred_at,
        "cursor": r.position,
    })
}

/// Render the movement just committed by a dispatch, straight from the
/// stored event (the read model may not have caught up yet).
pub fn committed_movement_to_json(stored: &StoredEvent) -> Option<serde_json::Value> {
    let event: ProductEvent = serde_json::from_value(stored.payload.clone()).ok()?;
    let ProductEvent::StockMovementRecorded(m) = event else {
        return None;
    };

    Some(serde_json::json!({
        "id": stored.event_id.to_string(),
        "product_id": m.product_id.0.to_string(),
        "type": m.kind,
        "quantity": m.quantity,
        "delta": m.delta,
        "resulting_stock": m.resulting_stock,
        "reason": m.reason,
        "description": m.description,
        "reference_number": m.reference_number,
        "unit_cost": m.unit_cost,
        "recorded_by": m.recorded_by.to_string(),
        "occurred_at": m.occurred_at,
        "stream_version": stored.sequence_number,
    }))
}
