use std::sync::Arc;

use axum::{Json, Router, extract::Extension, http::StatusCode, response::IntoResponse, routing::get};

use crate::app::services::AppServices;
use crate::context::ClinicContext;

pub fn router() -> Router {
    Router::new().route("/summary", get(summary))
}

pub async fn summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
) -> axum::response::Response {
    let summary = services.summary(clinic.clinic_id());
    (StatusCode::OK, Json(summary)).into_response()
}
