use axum::Router;

pub mod dashboard;
pub mod products;
pub mod stock_movements;
pub mod system;

/// Router for all clinic-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/products", products::router())
        .nest("/stock-movements", stock_movements::router())
        .nest("/stock/dashboard", dashboard::router())
}
