use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bundlestock_bundles::{
    Bundle, BundleId, CreateBundle, DecrementStock, IdempotencyKey, Quantity, SaleWindow,
    StockDecrement,
};
use bundlestock_core::{AggregateRoot, DomainError, DomainResult};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

// -------------------------
// Response envelope
// -------------------------

/// Body shape shared by every `/api` response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub error: bool,
    pub success: bool,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
            error: false,
            success: true,
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
            error: true,
            success: false,
        }
    }
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecrementStockRequest {
    pub bundle_id: Option<String>,
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBundleRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub price: u64,
    #[serde(default)]
    pub stock: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_time_limited: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl DecrementStockRequest {
    /// Validate the body and headers into a domain command stamped with `now`.
    pub fn into_command(self, headers: &HeaderMap, now: DateTime<Utc>) -> DomainResult<DecrementStock> {
        let raw_id = self
            .bundle_id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| DomainError::validation("bundleId is required"))?;
        let bundle_id: BundleId = raw_id.parse()?;

        Ok(DecrementStock {
            bundle_id,
            quantity: Quantity::from_request(self.quantity)?,
            idempotency_key: idempotency_key(headers)?,
            occurred_at: now,
        })
    }
}

impl CreateBundleRequest {
    pub fn into_command(self, now: DateTime<Utc>) -> DomainResult<CreateBundle> {
        let sale_window = SaleWindow::from_flags(self.is_time_limited, self.start_date, self.end_date)?;

        Ok(CreateBundle {
            bundle_id: BundleId::generate(),
            name: self.name,
            description: self.description,
            price: self.price,
            stock: self.stock,
            is_active: self.is_active,
            sale_window,
            occurred_at: now,
        })
    }
}

fn idempotency_key(headers: &HeaderMap) -> DomainResult<Option<IdempotencyKey>> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| DomainError::validation("idempotency key must be visible ASCII"))?;
    IdempotencyKey::parse(raw).map(Some)
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDecrementResponse {
    pub bundle_id: String,
    pub remaining_stock: u32,
    pub replayed: bool,
}

impl From<StockDecrement> for StockDecrementResponse {
    fn from(value: StockDecrement) -> Self {
        Self {
            bundle_id: value.bundle_id.to_string(),
            remaining_stock: value.remaining_stock,
            replayed: value.replayed,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: u64,
    pub stock: u32,
    pub is_active: bool,
    pub is_time_limited: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl From<&Bundle> for BundleResponse {
    fn from(b: &Bundle) -> Self {
        Self {
            id: b.id_typed().to_string(),
            name: b.name().to_string(),
            description: b.description().map(str::to_string),
            price: b.price(),
            stock: b.stock(),
            is_active: b.is_active(),
            is_time_limited: b.is_time_limited(),
            start_date: b.sale_window().map(SaleWindow::starts_at),
            end_date: b.sale_window().map(SaleWindow::ends_at),
            created_at: b.created_at(),
            updated_at: b.updated_at(),
            version: b.version(),
        }
    }
}
