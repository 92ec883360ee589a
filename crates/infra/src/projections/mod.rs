mod movement_history;
mod stock_levels;
mod summary;

pub use movement_history::{
    MovementHistoryProjection, MovementPage, MovementQuery, MovementRecord,
};
pub use stock_levels::{ProductReadModel, StockLevelsProjection};
pub use summary::{StockSummary, summarize};

use thiserror::Error;

/// Shared projection failure modes.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("clinic isolation violation: {0}")]
    ClinicIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}
