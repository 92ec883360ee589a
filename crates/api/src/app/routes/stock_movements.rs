use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use clinistock_core::AggregateId;
use clinistock_infra::projections::MovementQuery;
use clinistock_inventory::{
    AdjustStock, IssueStock, MovementKind, MovementReason, Product, ProductCommand, ProductId,
    ReceiveStock,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, ClinicContext, IdempotencyKey};

const DEFAULT_PAGE_SIZE: usize = 50;

pub fn router() -> Router {
    Router::new()
        .route("/", post(record_movement).get(list_movements))
        .route("/adjustment", post(record_adjustment))
}

pub async fn record_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(actor): Extension<ActorContext>,
    Extension(idempotency): Extension<IdempotencyKey>,
    Json(body): Json<dto::RecordMovementRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match body.product_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id")
        }
    };
    let product_id = ProductId::new(agg);

    let cmd = match body.kind {
        MovementKind::In => ProductCommand::ReceiveStock(ReceiveStock {
            clinic_id: clinic.clinic_id(),
            product_id,
            quantity: body.quantity,
            reason: body.reason,
            description: body.description,
            reference_number: body.reference_number,
            unit_cost: body.unit_cost,
            recorded_by: actor.actor_id(),
            occurred_at: Utc::now(),
        }),
        MovementKind::Out => ProductCommand::IssueStock(IssueStock {
            clinic_id: clinic.clinic_id(),
            product_id,
            quantity: body.quantity,
            reason: body.reason,
            description: body.description,
            reference_number: body.reference_number,
            unit_cost: body.unit_cost,
            recorded_by: actor.actor_id(),
            occurred_at: Utc::now(),
        }),
        MovementKind::Adjustment => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_operation",
                "adjustments go through the adjustment endpoint with an absolute target quantity",
            );
        }
    };

    dispatch_movement(&services, &clinic, &idempotency, agg, cmd)
}

pub async fn record_adjustment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(actor): Extension<ActorContext>,
    Extension(idempotency): Extension<IdempotencyKey>,
    Json(body): Json<dto::AdjustmentRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match body.product_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id")
        }
    };
    let product_id = ProductId::new(agg);

    let cmd = ProductCommand::AdjustStock(AdjustStock {
        clinic_id: clinic.clinic_id(),
        product_id,
        new_quantity: body.new_quantity,
        reason: body.reason.unwrap_or(MovementReason::Adjustment),
        description: body.description,
        reference_number: body.reference_number,
        recorded_by: actor.actor_id(),
        occurred_at: Utc::now(),
    });

    dispatch_movement(&services, &clinic, &idempotency, agg, cmd)
}

fn dispatch_movement(
    services: &AppServices,
    clinic: &ClinicContext,
    idempotency: &IdempotencyKey,
    agg: AggregateId,
    cmd: ProductCommand,
) -> axum::response::Response {
    let committed = match services.dispatch::<Product>(
        clinic.clinic_id(),
        agg,
        "inventory.product",
        cmd,
        idempotency.request_id(),
        |_clinic_id, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    match committed.last().and_then(dto::committed_movement_to_json) {
        Some(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        None => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "deserialize_error",
            "committed event was not a stock movement",
        ),
    }
}

pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Query(params): Query<dto::MovementListParams>,
) -> axum::response::Response {
    let product_id = match params.product_id {
        Some(raw) => match raw.parse::<AggregateId>() {
            Ok(agg) => Some(ProductId::new(agg)),
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_id",
                    "invalid product id",
                )
            }
        },
        None => None,
    };

    let query = MovementQuery {
        product_id,
        before: params.cursor,
        limit: Some(params.limit.unwrap_or(DEFAULT_PAGE_SIZE)),
    };

    let page = services.movements_list(clinic.clinic_id(), &query);
    let movements: Vec<_> = page.records.iter().map(dto::movement_to_json).collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "movements": movements,
            "next_cursor": page.next_cursor,
        })),
    )
        .into_response()
}
