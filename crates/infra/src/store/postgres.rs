//! Postgres-backed bundle store.
//!
//! The stock decrement is a single conditional `UPDATE ... RETURNING`: the
//! purchase preconditions are part of the `WHERE` clause, so the row is only
//! touched when every check passes at write time. When nothing is updated
//! the row is re-read and the domain rules explain why.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, warn};

use bundlestock_bundles::{
    Bundle, BundleId, DecrementReceipt, DecrementStock, IdempotencyKey, Quantity,
    ReceiptRetention, SaleWindow, StockDecrement,
};
use bundlestock_core::{AggregateId, AggregateRoot};

use super::{BundleStore, StoreError};
use crate::error::CommandError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS bundles (
        id              UUID PRIMARY KEY,
        name            TEXT NOT NULL,
        description     TEXT,
        price           BIGINT NOT NULL CHECK (price >= 0),
        stock           BIGINT NOT NULL CHECK (stock >= 0),
        is_active       BOOLEAN NOT NULL,
        is_time_limited BOOLEAN NOT NULL,
        starts_at       TIMESTAMPTZ,
        ends_at         TIMESTAMPTZ,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL,
        version         BIGINT NOT NULL,
        CHECK (
            NOT is_time_limited
            OR (starts_at IS NOT NULL AND ends_at IS NOT NULL AND starts_at <= ends_at)
        )
    )
    "#,
    "CREATE INDEX IF NOT EXISTS bundles_created_at_idx ON bundles (created_at, id)",
    r#"
    CREATE TABLE IF NOT EXISTS stock_decrements (
        idempotency_key TEXT PRIMARY KEY,
        bundle_id       UUID NOT NULL,
        quantity        BIGINT NOT NULL CHECK (quantity > 0),
        remaining_stock BIGINT,
        created_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS stock_decrements_created_at_idx ON stock_decrements (created_at)",
];

const BUNDLE_COLUMNS: &str = "id, name, description, price, stock, is_active, is_time_limited, \
                              starts_at, ends_at, created_at, updated_at, version";

pub struct PostgresBundleStore {
    pool: Arc<PgPool>,
    retention: ReceiptRetention,
}

impl PostgresBundleStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            retention: ReceiptRetention::default(),
        }
    }

    pub fn with_receipt_retention(mut self, retention: ReceiptRetention) -> Self {
        self.retention = retention;
        self
    }

    /// Open a connection pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    /// Claim `key` for this request inside `tx`.
    ///
    /// Returns the earlier receipt when the key was already used and has not
    /// expired. A concurrent holder of the same key blocks this insert until
    /// it commits or aborts.
    async fn claim_key(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: &IdempotencyKey,
        cmd: &DecrementStock,
    ) -> Result<Option<DecrementReceipt>, CommandError> {
        sqlx::query("DELETE FROM stock_decrements WHERE idempotency_key = $1 AND created_at < $2")
            .bind(key.as_str())
            .bind(self.retention.cutoff(cmd.occurred_at))
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("expire_idempotency_key", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO stock_decrements (idempotency_key, bundle_id, quantity, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(key.as_str())
        .bind(cmd.bundle_id.0.as_uuid())
        .bind(i64::from(cmd.quantity.get()))
        .bind(cmd.occurred_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("claim_idempotency_key", e))?
        .rows_affected();

        if inserted == 1 {
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            SELECT bundle_id, quantity, remaining_stock, created_at
            FROM stock_decrements
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_idempotency_key", e))?;

        let bundle_id: uuid::Uuid = read_column(&row, "bundle_id")?;
        let quantity: i64 = read_column(&row, "quantity")?;
        let remaining: Option<i64> = read_column(&row, "remaining_stock")?;

        let remaining = remaining.ok_or_else(|| {
            CommandError::Conflict("a request with this idempotency key is still in progress".into())
        })?;

        Ok(Some(DecrementReceipt {
            bundle_id: BundleId::new(AggregateId::from_uuid(bundle_id)),
            quantity: Quantity::new(to_u32("quantity", quantity)?)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            remaining_stock: to_u32("remaining_stock", remaining)?,
            recorded_at: read_column(&row, "created_at")?,
        }))
    }
}

#[async_trait::async_trait]
impl BundleStore for PostgresBundleStore {
    async fn insert(&self, bundle: Bundle) -> Result<(), StoreError> {
        let price = i64::try_from(bundle.price())
            .map_err(|_| StoreError::Backend(format!("price {} out of range", bundle.price())))?;
        let version = i64::try_from(bundle.version())
            .map_err(|_| StoreError::Backend(format!("version {} out of range", bundle.version())))?;

        sqlx::query(
            r#"
            INSERT INTO bundles (
                id, name, description, price, stock, is_active, is_time_limited,
                starts_at, ends_at, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(bundle.id_typed().0.as_uuid())
        .bind(bundle.name())
        .bind(bundle.description())
        .bind(price)
        .bind(i64::from(bundle.stock()))
        .bind(bundle.is_active())
        .bind(bundle.is_time_limited())
        .bind(bundle.sale_window().map(SaleWindow::starts_at))
        .bind(bundle.sale_window().map(SaleWindow::ends_at))
        .bind(bundle.created_at())
        .bind(bundle.updated_at())
        .bind(version)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_bundle", e))?;

        Ok(())
    }

    async fn get(&self, id: BundleId) -> Result<Option<Bundle>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BUNDLE_COLUMNS} FROM bundles WHERE id = $1"))
            .bind(id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_bundle", e))?;

        row.as_ref().map(bundle_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Bundle>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BUNDLE_COLUMNS} FROM bundles ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_bundles", e))?;

        rows.iter().map(bundle_from_row).collect()
    }

    async fn decrement_stock(&self, cmd: &DecrementStock) -> Result<StockDecrement, CommandError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        if let Some(key) = &cmd.idempotency_key {
            if let Some(receipt) = self.claim_key(&mut tx, key, cmd).await? {
                debug!(idempotency_key = %key, "replaying recorded stock decrement");
                return Ok(receipt.replay(cmd)?);
            }
        }

        let quantity = i64::from(cmd.quantity.get());
        let updated = sqlx::query(
            r#"
            UPDATE bundles
            SET stock = stock - $2,
                version = version + 1,
                updated_at = $3
            WHERE id = $1
              AND is_active
              AND (NOT is_time_limited OR ($3 >= starts_at AND $3 <= ends_at))
              AND stock >= $2
            RETURNING stock
            "#,
        )
        .bind(cmd.bundle_id.0.as_uuid())
        .bind(quantity)
        .bind(cmd.occurred_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("decrement_stock", e))?;

        let Some(row) = updated else {
            // Dropping `tx` rolls back the idempotency claim.
            return Err(explain_rejection(&mut tx, cmd).await);
        };

        let remaining: i64 = read_column(&row, "stock")?;
        let remaining_stock = to_u32("stock", remaining)?;

        if let Some(key) = &cmd.idempotency_key {
            sqlx::query("UPDATE stock_decrements SET remaining_stock = $2 WHERE idempotency_key = $1")
                .bind(key.as_str())
                .bind(remaining)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("record_idempotency_key", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(StockDecrement {
            bundle_id: cmd.bundle_id,
            remaining_stock,
            replayed: false,
        })
    }

    async fn purge_expired_receipts(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let purged = sqlx::query("DELETE FROM stock_decrements WHERE created_at < $1")
            .bind(self.retention.cutoff(now))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_idempotency_keys", e))?
            .rows_affected();
        Ok(purged)
    }
}

/// Work out which precondition made the conditional update miss.
async fn explain_rejection(tx: &mut Transaction<'_, Postgres>, cmd: &DecrementStock) -> CommandError {
    let row = sqlx::query(&format!("SELECT {BUNDLE_COLUMNS} FROM bundles WHERE id = $1"))
        .bind(cmd.bundle_id.0.as_uuid())
        .fetch_optional(&mut **tx)
        .await;

    let bundle = match row {
        Ok(Some(row)) => match bundle_from_row(&row) {
            Ok(bundle) => bundle,
            Err(e) => return e.into(),
        },
        Ok(None) => return CommandError::NotFound,
        Err(e) => return map_sqlx_error("explain_rejection", e).into(),
    };

    match bundle.ensure_purchasable(cmd.quantity, cmd.occurred_at) {
        Err(e) => e.into(),
        Ok(()) => {
            // Only reachable if the row changed between the update and this read.
            warn!(bundle_id = %cmd.bundle_id, "bundle changed while decrementing stock");
            CommandError::Conflict("bundle changed concurrently; retry the request".into())
        }
    }
}

fn bundle_from_row(row: &PgRow) -> Result<Bundle, StoreError> {
    let id: uuid::Uuid = read_column(row, "id")?;
    let price: i64 = read_column(row, "price")?;
    let stock: i64 = read_column(row, "stock")?;
    let version: i64 = read_column(row, "version")?;
    let is_time_limited: bool = read_column(row, "is_time_limited")?;
    let starts_at: Option<DateTime<Utc>> = read_column(row, "starts_at")?;
    let ends_at: Option<DateTime<Utc>> = read_column(row, "ends_at")?;

    let sale_window = SaleWindow::from_flags(is_time_limited, starts_at, ends_at)
        .map_err(|e| StoreError::Corrupt(format!("bundle {id}: {e}")))?;

    Ok(Bundle::restore(
        BundleId::new(AggregateId::from_uuid(id)),
        read_column(row, "name")?,
        read_column(row, "description")?,
        u64::try_from(price).map_err(|_| StoreError::Corrupt(format!("negative price {price}")))?,
        to_u32("stock", stock)?,
        read_column(row, "is_active")?,
        sale_window,
        read_column(row, "created_at")?,
        read_column(row, "updated_at")?,
        u64::try_from(version).map_err(|_| StoreError::Corrupt(format!("negative version {version}")))?,
    ))
}

fn read_column<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("failed to read column {column}: {e}")))
}

fn to_u32(column: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => StoreError::Duplicate(msg),
                // check_violation
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::Backend(format!("{operation}: row not found")),
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}
