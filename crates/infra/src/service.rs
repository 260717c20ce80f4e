//! Bundle command orchestration.
//!
//! `BundleService` sits between the HTTP handlers and a `BundleStore`. It
//! builds domain values from commands, calls the store and logs outcomes. The
//! atomicity of a purchase is the store's job; the service never reads a
//! bundle and writes it back.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use bundlestock_bundles::{Bundle, BundleId, CreateBundle, DecrementStock, StockDecrement};

use crate::error::CommandError;
use crate::store::BundleStore;

#[derive(Debug, Clone)]
pub struct BundleService<S> {
    store: S,
}

impl<S> BundleService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> BundleService<S>
where
    S: BundleStore,
{
    #[tracing::instrument(skip_all, fields(bundle_id = %cmd.bundle_id))]
    pub async fn create_bundle(&self, cmd: CreateBundle) -> Result<Bundle, CommandError> {
        let bundle = Bundle::create(&cmd)?;
        self.store.insert(bundle.clone()).await.map_err(|e| {
            error!(error = %e, "failed to persist bundle");
            CommandError::from(e)
        })?;
        info!(stock = bundle.stock(), "bundle created");
        Ok(bundle)
    }

    pub async fn get_bundle(&self, id: BundleId) -> Result<Bundle, CommandError> {
        self.store.get(id).await?.ok_or(CommandError::NotFound)
    }

    pub async fn list_bundles(&self) -> Result<Vec<Bundle>, CommandError> {
        Ok(self.store.list().await?)
    }

    /// Decrement a bundle's stock for a purchase.
    ///
    /// Precondition failures leave the bundle untouched; see
    /// `Bundle::ensure_purchasable` for the order in which they are checked.
    #[tracing::instrument(
        skip_all,
        fields(
            bundle_id = %cmd.bundle_id,
            quantity = cmd.quantity.get(),
            idempotency_key = cmd.idempotency_key.as_ref().map(|k| k.as_str()),
        )
    )]
    pub async fn decrement_stock(&self, cmd: DecrementStock) -> Result<StockDecrement, CommandError> {
        match self.store.decrement_stock(&cmd).await {
            Ok(out) => {
                info!(
                    remaining_stock = out.remaining_stock,
                    replayed = out.replayed,
                    "bundle stock decremented"
                );
                Ok(out)
            }
            Err(e) if e.is_rejection() => {
                warn!(reason = %e, "stock decrement rejected");
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "stock decrement failed");
                Err(e)
            }
        }
    }

    /// Drop idempotency receipts past their retention.
    pub async fn purge_expired_receipts(&self, now: DateTime<Utc>) -> Result<u64, CommandError> {
        let purged = self.store.purge_expired_receipts(now).await.map_err(|e| {
            error!(error = %e, "failed to purge idempotency receipts");
            CommandError::from(e)
        })?;
        if purged > 0 {
            info!(purged, "purged expired idempotency receipts");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use bundlestock_bundles::{IdempotencyKey, Quantity, SaleWindow};

    use super::*;
    use crate::store::InMemoryBundleStore;

    fn service() -> BundleService<Arc<InMemoryBundleStore>> {
        BundleService::new(Arc::new(InMemoryBundleStore::new()))
    }

    fn create(stock: u32) -> CreateBundle {
        CreateBundle {
            bundle_id: BundleId::generate(),
            name: "Family Pack".to_string(),
            description: None,
            price: 9_900,
            stock,
            is_active: true,
            sale_window: None,
            occurred_at: Utc::now(),
        }
    }

    fn decrement(bundle_id: BundleId, quantity: u32) -> DecrementStock {
        DecrementStock {
            bundle_id,
            quantity: Quantity::new(quantity).unwrap(),
            idempotency_key: None,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let svc = service();
        let created = svc.create_bundle(create(3)).await.unwrap();

        let fetched = svc.get_bundle(created.id_typed()).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(svc.list_bundles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_validates_before_persisting() {
        let svc = service();
        let mut cmd = create(3);
        cmd.name = String::new();

        assert!(matches!(
            svc.create_bundle(cmd).await,
            Err(CommandError::Validation(_))
        ));
        assert!(svc.list_bundles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_unknown_bundle_is_not_found() {
        assert!(matches!(
            service().get_bundle(BundleId::generate()).await,
            Err(CommandError::NotFound)
        ));
    }

    #[tokio::test]
    async fn decrement_flows_through_to_store() {
        let svc = service();
        let id = svc.create_bundle(create(5)).await.unwrap().id_typed();

        let out = svc.decrement_stock(decrement(id, 3)).await.unwrap();
        assert_eq!(out.remaining_stock, 2);
        assert_eq!(svc.get_bundle(id).await.unwrap().stock(), 2);
    }

    #[tokio::test]
    async fn time_window_is_checked_against_command_time() {
        let svc = service();
        let now = Utc::now();
        let mut cmd = create(5);
        cmd.sale_window = Some(SaleWindow::new(now, now + Duration::hours(1)).unwrap());
        let id = svc.create_bundle(cmd).await.unwrap().id_typed();

        let mut late = decrement(id, 1);
        late.occurred_at = now + Duration::hours(2);
        assert!(matches!(
            svc.decrement_stock(late).await,
            Err(CommandError::InvalidState(_))
        ));

        let mut on_time = decrement(id, 1);
        on_time.occurred_at = now + Duration::minutes(30);
        assert_eq!(svc.decrement_stock(on_time).await.unwrap().remaining_stock, 4);
    }

    #[tokio::test]
    async fn retried_request_with_key_is_applied_once() {
        let svc = service();
        let id = svc.create_bundle(create(5)).await.unwrap().id_typed();

        let mut cmd = decrement(id, 2);
        cmd.idempotency_key = Some(IdempotencyKey::parse("order-9001").unwrap());

        svc.decrement_stock(cmd.clone()).await.unwrap();
        let retry = svc.decrement_stock(cmd).await.unwrap();

        assert!(retry.replayed);
        assert_eq!(svc.get_bundle(id).await.unwrap().stock(), 3);
    }

    #[tokio::test]
    async fn purge_releases_expired_keys() {
        let svc = service();
        let bundle = svc.create_bundle(create(5)).await.unwrap();

        let mut cmd = decrement(bundle.id_typed(), 1);
        cmd.idempotency_key = Some(IdempotencyKey::parse("sweep-me").unwrap());
        let recorded_at = cmd.occurred_at;
        svc.decrement_stock(cmd).await.unwrap();

        assert_eq!(svc.purge_expired_receipts(recorded_at).await.unwrap(), 0);
        let later = recorded_at + Duration::days(2);
        assert_eq!(svc.purge_expired_receipts(later).await.unwrap(), 1);
    }
}
