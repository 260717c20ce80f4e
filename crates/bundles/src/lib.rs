//! Bundle domain module.
//!
//! This crate contains the business rules for product bundles, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage). The
//! caller supplies "now" so sales-window checks stay testable.

pub mod bundle;
pub mod stock;

pub use bundle::{Bundle, BundleId, CreateBundle, SaleWindow};
pub use stock::{
    DecrementReceipt, DecrementStock, IdempotencyKey, Quantity, ReceiptRetention, StockDecrement,
};
