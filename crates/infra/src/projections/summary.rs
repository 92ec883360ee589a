use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use clinistock_core::ClinicId;
use clinistock_inventory::{ProductId, StockStatus};

use super::movement_history::MovementHistoryProjection;
use super::stock_levels::{ProductReadModel, StockLevelsProjection};
use crate::read_model::ClinicStore;

/// Window used for the "recent movements" count.
const RECENT_WINDOW_DAYS: i64 = 30;

/// Dashboard roll-up for one clinic. Computed on demand from the read
/// models; deactivated products are excluded throughout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockSummary {
    pub total_products: usize,
    pub low_stock_count: usize,
    pub out_of_stock_count: usize,
    /// Σ current_stock × unit_price over active priced products, in cents.
    /// Valued at today's price, not the price at receipt.
    pub total_stock_value: u64,
    /// Movements recorded in the last 30 days.
    pub recent_movement_count: usize,
}

/// Compute the dashboard summary for a clinic as of `now`.
pub fn summarize<S>(
    levels: &StockLevelsProjection<S>,
    history: &MovementHistoryProjection,
    clinic_id: ClinicId,
    now: DateTime<Utc>,
) -> StockSummary
where
    S: ClinicStore<ProductId, ProductReadModel>,
{
    let active: Vec<ProductReadModel> = levels
        .list(clinic_id)
        .into_iter()
        .filter(|p| p.active)
        .collect();

    let low_stock_count = active
        .iter()
        .filter(|p| p.status() == StockStatus::Low)
        .count();
    let out_of_stock_count = active
        .iter()
        .filter(|p| p.status() == StockStatus::OutOfStock)
        .count();

    let total_stock_value = active
        .iter()
        .filter_map(|p| {
            let price = p.unit_price?;
            let quantity = u64::try_from(p.current_stock).ok()?;
            Some(quantity.saturating_mul(price))
        })
        .fold(0u64, u64::saturating_add);

    let since = now - Duration::days(RECENT_WINDOW_DAYS);

    StockSummary {
        total_products: active.len(),
        low_stock_count,
        out_of_stock_count,
        total_stock_value,
        recent_movement_count: history.count_since(clinic_id, since),
    }
}
