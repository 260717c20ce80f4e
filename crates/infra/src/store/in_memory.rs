use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use bundlestock_bundles::{
    Bundle, BundleId, DecrementReceipt, DecrementStock, IdempotencyKey, ReceiptRetention,
    StockDecrement,
};

use super::{BundleStore, StoreError};
use crate::error::CommandError;

#[derive(Debug, Default)]
struct State {
    bundles: HashMap<BundleId, Bundle>,
    receipts: HashMap<IdempotencyKey, DecrementReceipt>,
}

/// In-memory bundle store for tests/dev.
///
/// Bundles and idempotency receipts share one lock; a decrement holds the
/// write guard for the whole check-mutate-record sequence.
#[derive(Debug, Default)]
pub struct InMemoryBundleStore {
    state: RwLock<State>,
    retention: ReceiptRetention,
}

impl InMemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_receipt_retention(mut self, retention: ReceiptRetention) -> Self {
        self.retention = retention;
        self
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

#[async_trait::async_trait]
impl BundleStore for InMemoryBundleStore {
    async fn insert(&self, bundle: Bundle) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let id = bundle.id_typed();
        if state.bundles.contains_key(&id) {
            return Err(StoreError::Duplicate(format!("bundle {id}")));
        }
        state.bundles.insert(id, bundle);
        Ok(())
    }

    async fn get(&self, id: BundleId) -> Result<Option<Bundle>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.bundles.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Bundle>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut bundles: Vec<Bundle> = state.bundles.values().cloned().collect();
        // UUIDv7 ids break ties between bundles created in the same instant.
        bundles.sort_by_key(|b| (b.created_at(), b.id_typed()));
        Ok(bundles)
    }

    async fn decrement_stock(&self, cmd: &DecrementStock) -> Result<StockDecrement, CommandError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;

        if let Some(key) = &cmd.idempotency_key {
            if let Some(receipt) = state.receipts.get(key) {
                if !receipt.is_expired(cmd.occurred_at, self.retention) {
                    return Ok(receipt.replay(cmd)?);
                }
            }
        }

        let bundle = state
            .bundles
            .get_mut(&cmd.bundle_id)
            .ok_or(CommandError::NotFound)?;
        let remaining_stock = bundle.decrement_stock(cmd.quantity, cmd.occurred_at)?;

        if let Some(key) = &cmd.idempotency_key {
            state.receipts.insert(
                key.clone(),
                DecrementReceipt {
                    bundle_id: cmd.bundle_id,
                    quantity: cmd.quantity,
                    remaining_stock,
                    recorded_at: cmd.occurred_at,
                },
            );
        }

        Ok(StockDecrement {
            bundle_id: cmd.bundle_id,
            remaining_stock,
            replayed: false,
        })
    }

    async fn purge_expired_receipts(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let before = state.receipts.len();
        state
            .receipts
            .retain(|_, receipt| !receipt.is_expired(now, self.retention));
        Ok((before - state.receipts.len()) as u64)
    }
}
