//! Inventory domain module (event-sourced).
//!
//! This crate contains the business rules for the supplies stock ledger,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage). The `Product` aggregate owns both the catalog attributes and
//! the movement ledger: every stock change is an immutable event in the
//! product's stream, and the materialized `current_stock` is a fold of
//! those events.

pub mod movement;
pub mod product;

pub use movement::{MovementKind, MovementReason, StockStatus, stock_status};
pub use product::{
    AdjustStock, CreateProduct, DeactivateProduct, IssueStock, Product, ProductCategory,
    ProductCommand, ProductCreated, ProductDeactivated, ProductEvent, ProductId, ProductUpdated,
    ReceiveStock, StockMovementRecorded, UpdateProduct,
};
