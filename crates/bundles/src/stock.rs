//! Stock decrement command, its inputs and outcomes.

use core::num::NonZeroU32;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use bundlestock_core::{DomainError, DomainResult, ValueObject};

use crate::bundle::BundleId;

/// Positive number of units requested in a single purchase.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(NonZeroU32);

impl ValueObject for Quantity {}

impl Quantity {
    pub const ONE: Quantity = Quantity(NonZeroU32::MIN);

    pub fn new(value: u32) -> DomainResult<Self> {
        NonZeroU32::new(value)
            .map(Self)
            .ok_or_else(|| DomainError::validation("quantity must be a positive integer"))
    }

    /// Interpret an optional, signed quantity from a request body. Absent means one.
    pub fn from_request(value: Option<i64>) -> DomainResult<Self> {
        match value {
            None => Ok(Self::ONE),
            Some(v) if v <= 0 => Err(DomainError::validation(
                "quantity must be a positive integer",
            )),
            Some(v) => u32::try_from(v)
                .map_err(|_| DomainError::validation(format!("quantity {v} is too large")))
                .and_then(Self::new),
        }
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::ONE
    }
}

/// Client-chosen key that makes a decrement safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub const MAX_LEN: usize = 255;

    pub fn parse(raw: &str) -> DomainResult<Self> {
        let key = raw.trim();
        if key.is_empty() || key.len() > Self::MAX_LEN {
            return Err(DomainError::validation(format!(
                "idempotency key must be 1..={} characters",
                Self::MAX_LEN
            )));
        }
        if !key.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(DomainError::validation(
                "idempotency key must contain only visible ASCII characters",
            ));
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Command: DecrementStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecrementStock {
    pub bundle_id: BundleId,
    pub quantity: Quantity,
    pub idempotency_key: Option<IdempotencyKey>,
    pub occurred_at: DateTime<Utc>,
}

/// Result of a decrement, as returned to callers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDecrement {
    pub bundle_id: BundleId,
    pub remaining_stock: u32,
    /// True when an earlier result was returned for a repeated idempotency key.
    pub replayed: bool,
}

/// How long an idempotency receipt is honoured after it was recorded.
///
/// Once a receipt is older than this, its key can be used for a new
/// decrement and stores are free to delete it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReceiptRetention(Duration);

impl ValueObject for ReceiptRetention {}

impl ReceiptRetention {
    pub const DEFAULT_SECS: u32 = 86_400;

    pub fn from_secs(secs: u32) -> DomainResult<Self> {
        if secs == 0 {
            return Err(DomainError::validation(
                "receipt retention must be at least one second",
            ));
        }
        Ok(Self(Duration::seconds(i64::from(secs))))
    }

    /// Receipts recorded strictly before the returned instant have expired.
    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn as_duration(self) -> Duration {
        self.0
    }
}

impl Default for ReceiptRetention {
    fn default() -> Self {
        Self(Duration::seconds(i64::from(Self::DEFAULT_SECS)))
    }
}

/// Record of an applied decrement, kept per idempotency key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecrementReceipt {
    pub bundle_id: BundleId,
    pub quantity: Quantity,
    pub remaining_stock: u32,
    pub recorded_at: DateTime<Utc>,
}

impl DecrementReceipt {
    pub fn is_expired(&self, now: DateTime<Utc>, retention: ReceiptRetention) -> bool {
        self.recorded_at < retention.cutoff(now)
    }

    /// Answer a repeated request from this receipt.
    ///
    /// Fails with `Conflict` when the key was first used for a different
    /// bundle or quantity.
    pub fn replay(&self, cmd: &DecrementStock) -> DomainResult<StockDecrement> {
        if self.bundle_id != cmd.bundle_id || self.quantity != cmd.quantity {
            return Err(DomainError::conflict(
                "idempotency key was already used for a different request",
            ));
        }
        Ok(StockDecrement {
            bundle_id: self.bundle_id,
            remaining_stock: self.remaining_stock,
            replayed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_quantity_defaults_to_one() {
        assert_eq!(Quantity::from_request(None).unwrap(), Quantity::ONE);
        assert_eq!(Quantity::default().get(), 1);
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        assert!(Quantity::from_request(Some(0)).is_err());
        assert!(Quantity::from_request(Some(-3)).is_err());
        assert!(Quantity::new(0).is_err());
    }

    #[test]
    fn oversized_quantity_is_rejected() {
        let err = Quantity::from_request(Some(i64::from(u32::MAX) + 1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(Quantity::from_request(Some(7)).unwrap().get(), 7);
    }

    #[test]
    fn idempotency_key_validation() {
        assert_eq!(IdempotencyKey::parse(" order-42 ").unwrap().as_str(), "order-42");
        assert!(IdempotencyKey::parse("").is_err());
        assert!(IdempotencyKey::parse("has space").is_err());
        assert!(IdempotencyKey::parse(&"k".repeat(256)).is_err());
    }

    #[test]
    fn receipt_replays_matching_request_only() {
        let bundle_id = BundleId::generate();
        let receipt = DecrementReceipt {
            bundle_id,
            quantity: Quantity::new(2).unwrap(),
            remaining_stock: 8,
            recorded_at: Utc::now(),
        };
        let mut cmd = DecrementStock {
            bundle_id,
            quantity: Quantity::new(2).unwrap(),
            idempotency_key: Some(IdempotencyKey::parse("abc").unwrap()),
            occurred_at: Utc::now(),
        };

        let replayed = receipt.replay(&cmd).unwrap();
        assert!(replayed.replayed);
        assert_eq!(replayed.remaining_stock, 8);

        cmd.quantity = Quantity::ONE;
        assert!(matches!(receipt.replay(&cmd), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn receipts_expire_after_retention() {
        let recorded_at = Utc::now();
        let receipt = DecrementReceipt {
            bundle_id: BundleId::generate(),
            quantity: Quantity::ONE,
            remaining_stock: 3,
            recorded_at,
        };
        let retention = ReceiptRetention::from_secs(600).unwrap();

        assert!(!receipt.is_expired(recorded_at, retention));
        assert!(!receipt.is_expired(recorded_at + Duration::seconds(600), retention));
        assert!(receipt.is_expired(recorded_at + Duration::seconds(601), retention));
    }

    #[test]
    fn retention_must_be_positive() {
        assert!(ReceiptRetention::from_secs(0).is_err());
        assert_eq!(
            ReceiptRetention::default().as_duration(),
            Duration::seconds(86_400)
        );
    }
}
