use core::str::FromStr;

use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use clinistock_core::{ActorId, ClinicId};

use crate::app::errors;
use crate::context::{ActorContext, ClinicContext, IdempotencyKey};

/// Extract the clinic/actor context headers and attach them as request
/// extensions. Authentication lives upstream of this service; these headers
/// are the identity it hands us.
///
/// - `X-Clinic-Id` (required): scopes every read and write.
/// - `X-Actor-Id` (required): who movements are attributed to.
/// - `Idempotency-Key` (optional): caller-supplied UUID for retry-safe
///   command dispatch.
pub async fn context_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let clinic_id: ClinicId = parse_required_header(req.headers(), "x-clinic-id", "clinic")?;
    let actor_id: ActorId = parse_required_header(req.headers(), "x-actor-id", "actor")?;

    let request_id = match req.headers().get("idempotency-key") {
        Some(value) => {
            let raw = value.to_str().map_err(|_| invalid_key_response())?;
            Some(Uuid::from_str(raw.trim()).map_err(|_| invalid_key_response())?)
        }
        None => None,
    };

    req.extensions_mut().insert(ClinicContext::new(clinic_id));
    req.extensions_mut().insert(ActorContext::new(actor_id));
    req.extensions_mut().insert(IdempotencyKey::new(request_id));

    Ok(next.run(req).await)
}

fn parse_required_header<T: FromStr>(
    headers: &HeaderMap,
    name: &'static str,
    what: &'static str,
) -> Result<T, Response> {
    let value = headers.get(name).ok_or_else(|| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "missing_context",
            format!("missing {name} header"),
        )
    })?;

    let value = value.to_str().map_err(|_| invalid_id_response(what))?;
    value.trim().parse().map_err(|_| invalid_id_response(what))
}

fn invalid_id_response(what: &'static str) -> Response {
    errors::json_error(
        StatusCode::BAD_REQUEST,
        "invalid_context",
        format!("{what} id is not a valid UUID"),
    )
}

fn invalid_key_response() -> Response {
    errors::json_error(
        StatusCode::BAD_REQUEST,
        "invalid_idempotency_key",
        "Idempotency-Key must be a UUID",
    )
}
