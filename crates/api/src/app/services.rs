use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use bundlestock_infra::{
    AppConfig, BundleService, BundleStore, InMemoryBundleStore, PostgresBundleStore, StoreConfig,
};

/// How often expired idempotency receipts are swept.
pub const RECEIPT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub type DynBundleStore = Arc<dyn BundleStore>;

/// Services shared by all handlers.
#[derive(Clone)]
pub struct AppServices {
    pub bundles: BundleService<DynBundleStore>,
}

impl AppServices {
    pub fn with_store(store: DynBundleStore) -> Self {
        Self {
            bundles: BundleService::new(store),
        }
    }

    /// In-memory wiring (dev/test).
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(InMemoryBundleStore::new()))
    }
}

/// Build services for the configured store backend.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let retention = config.receipt_retention;
    match &config.store {
        StoreConfig::InMemory => {
            tracing::warn!("using in-memory bundle store; data is lost on restart");
            let store = InMemoryBundleStore::new().with_receipt_retention(retention);
            Ok(AppServices::with_store(Arc::new(store)))
        }
        StoreConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresBundleStore::connect(database_url, *max_connections)
                .await
                .context("failed to connect to Postgres")?
                .with_receipt_retention(retention);
            store
                .migrate()
                .await
                .context("failed to create bundle schema")?;
            tracing::info!(max_connections, "using Postgres bundle store");
            Ok(AppServices::with_store(Arc::new(store)))
        }
    }
}

/// Periodically delete idempotency receipts that are past retention.
pub fn spawn_receipt_sweeper(services: AppServices, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            // Failures are logged by the service; the next tick retries.
            let _ = services.bundles.purge_expired_receipts(Utc::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_config_builds_services() {
        let services = build_services(&AppConfig::default()).await.unwrap();
        assert!(services.bundles.list_bundles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweeper_runs_until_aborted() {
        let handle = spawn_receipt_sweeper(AppServices::in_memory(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
