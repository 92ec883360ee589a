use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use clinistock_core::AggregateId;
use clinistock_inventory::{
    CreateProduct, DeactivateProduct, Product, ProductCommand, ProductId, UpdateProduct,
    stock_status,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, ClinicContext, IdempotencyKey};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route(
            "/:id",
            get(get_product).put(update_product).delete(deactivate_product),
        )
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(actor): Extension<ActorContext>,
    Extension(idempotency): Extension<IdempotencyKey>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let agg = AggregateId::new();
    let product_id = ProductId::new(agg);

    let cmd = ProductCommand::CreateProduct(CreateProduct {
        clinic_id: clinic.clinic_id(),
        product_id,
        name: body.name.clone(),
        description: body.description.clone(),
        category: body.category,
        supplier: body.supplier.clone(),
        unit_of_measure: body.unit_of_measure.clone(),
        unit_price: body.unit_price,
        barcode: body.barcode.clone(),
        min_stock: body.min_stock,
        opening_stock: body.opening_stock,
        recorded_by: actor.actor_id(),
        occurred_at: Utc::now(),
    });

    if let Err(e) = services.dispatch::<Product>(
        clinic.clinic_id(),
        agg,
        "inventory.product",
        cmd,
        idempotency.request_id(),
        |_clinic_id, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        return errors::dispatch_error_to_response(e);
    }

    // Respond from the committed command, not the read model (projections
    // are eventually consistent).
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "name": body.name,
            "description": body.description,
            "category": body.category,
            "supplier": body.supplier,
            "unit_of_measure": body.unit_of_measure,
            "unit_price": body.unit_price,
            "barcode": body.barcode,
            "min_stock": body.min_stock,
            "current_stock": body.opening_stock,
            "status": stock_status(body.opening_stock, body.min_stock),
            "active": true,
        })),
    )
        .into_response()
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
) -> axum::response::Response {
    let mut products = services.products_list(clinic.clinic_id());
    products.sort_by(|a, b| a.name.cmp(&b.name));

    let body: Vec<_> = products.into_iter().map(dto::product_to_json).collect();
    (StatusCode::OK, Json(serde_json::json!({ "products": body }))).into_response()
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id")
        }
    };

    let product_id = ProductId::new(agg);
    match services.product_get(clinic.clinic_id(), &product_id) {
        Some(rm) => (StatusCode::OK, Json(dto::product_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(idempotency): Extension<IdempotencyKey>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateProductRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id")
        }
    };

    // Stock is only changed by recording movements.
    if body.current_stock.is_some() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_operation",
            "current_stock cannot be set directly; record a stock movement instead",
        );
    }

    let product_id = ProductId::new(agg);
    let cmd = ProductCommand::UpdateProduct(UpdateProduct {
        clinic_id: clinic.clinic_id(),
        product_id,
        name: body.name,
        description: body.description,
        category: body.category,
        supplier: body.supplier,
        unit_of_measure: body.unit_of_measure,
        unit_price: body.unit_price,
        barcode: body.barcode,
        min_stock: body.min_stock,
        occurred_at: Utc::now(),
    });

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

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn deactivate_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(idempotency): Extension<IdempotencyKey>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id")
        }
    };

    let product_id = ProductId::new(agg);
    let cmd = ProductCommand::DeactivateProduct(DeactivateProduct {
        clinic_id: clinic.clinic_id(),
        product_id,
        occurred_at: Utc::now(),
    });

    if let Err(e) = services.dispatch::<Product>(
        clinic.clinic_id(),
        agg,
        "inventory.product",
        cmd,
        idempotency.request_id(),
        |_clinic_id, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        return errors::dispatch_error_to_response(e);
    }

    StatusCode::NO_CONTENT.into_response()
}
