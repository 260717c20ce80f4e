//! Bundle persistence abstractions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use bundlestock_bundles::{Bundle, BundleId, DecrementStock, StockDecrement};

use crate::error::CommandError;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryBundleStore;
pub use postgres::PostgresBundleStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record with the same identity already exists.
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// A persisted row could not be turned back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The backend failed (connection, lock poisoning, SQL error, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Storage for bundles.
///
/// `decrement_stock` is the only mutation after creation and must be atomic:
/// the purchase preconditions and the write happen as one step, so concurrent
/// callers can never observe or produce negative stock.
#[async_trait::async_trait]
pub trait BundleStore: Send + Sync {
    async fn insert(&self, bundle: Bundle) -> Result<(), StoreError>;

    async fn get(&self, id: BundleId) -> Result<Option<Bundle>, StoreError>;

    /// All bundles, oldest first.
    async fn list(&self) -> Result<Vec<Bundle>, StoreError>;

    /// Check-and-decrement in a single atomic operation.
    ///
    /// When the command carries an idempotency key that was already applied,
    /// the stored outcome is replayed instead of decrementing again.
    async fn decrement_stock(&self, cmd: &DecrementStock) -> Result<StockDecrement, CommandError>;

    /// Delete idempotency receipts that have outlived the store's retention
    /// as of `now`. Returns how many were removed.
    async fn purge_expired_receipts(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait::async_trait]
impl<S> BundleStore for Arc<S>
where
    S: BundleStore + ?Sized,
{
    async fn insert(&self, bundle: Bundle) -> Result<(), StoreError> {
        (**self).insert(bundle).await
    }

    async fn get(&self, id: BundleId) -> Result<Option<Bundle>, StoreError> {
        (**self).get(id).await
    }

    async fn list(&self) -> Result<Vec<Bundle>, StoreError> {
        (**self).list().await
    }

    async fn decrement_stock(&self, cmd: &DecrementStock) -> Result<StockDecrement, CommandError> {
        (**self).decrement_stock(cmd).await
    }

    async fn purge_expired_receipts(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).purge_expired_receipts(now).await
    }
}
