use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bundlestock_core::{AggregateId, AggregateRoot, DomainError, DomainResult, ValueObject};

use crate::stock::Quantity;

/// Bundle identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub AggregateId);

impl BundleId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for BundleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for BundleId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Inclusive time range during which a time-limited bundle can be sold.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindow {
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

impl ValueObject for SaleWindow {}

impl SaleWindow {
    pub fn new(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> DomainResult<Self> {
        if ends_at < starts_at {
            return Err(DomainError::validation(
                "sale window end date must not precede its start date",
            ));
        }
        Ok(Self { starts_at, ends_at })
    }

    /// Build an optional window from the flag + dates shape used on the wire.
    ///
    /// A time-limited bundle must carry both dates. Dates sent for a bundle
    /// that is not time-limited are ignored.
    pub fn from_flags(
        is_time_limited: bool,
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
    ) -> DomainResult<Option<Self>> {
        if !is_time_limited {
            return Ok(None);
        }
        match (starts_at, ends_at) {
            (Some(start), Some(end)) => Self::new(start, end).map(Some),
            _ => Err(DomainError::validation(
                "time-limited bundles require both startDate and endDate",
            )),
        }
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        self.starts_at
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.ends_at
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now <= self.ends_at
    }

    fn ensure_open(&self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.contains(now) {
            return Ok(());
        }
        if now < self.starts_at {
            return Err(DomainError::invalid_state(format!(
                "bundle sale has not started yet (starts at {})",
                self.starts_at.to_rfc3339()
            )));
        }
        Err(DomainError::invalid_state(format!(
            "bundle sale has ended (ended at {})",
            self.ends_at.to_rfc3339()
        )))
    }
}

/// Command: CreateBundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBundle {
    pub bundle_id: BundleId,
    pub name: String,
    pub description: Option<String>,
    /// Price in minor currency units.
    pub price: u64,
    pub stock: u32,
    pub is_active: bool,
    pub sale_window: Option<SaleWindow>,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate root: Bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    id: BundleId,
    name: String,
    description: Option<String>,
    price: u64,
    stock: u32,
    is_active: bool,
    sale_window: Option<SaleWindow>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Bundle {
    /// Largest storable price, in minor units (a signed 64-bit column).
    pub const MAX_PRICE: u64 = i64::MAX as u64;

    pub fn create(cmd: &CreateBundle) -> DomainResult<Self> {
        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.price > Self::MAX_PRICE {
            return Err(DomainError::validation(format!(
                "price must not exceed {}",
                Self::MAX_PRICE
            )));
        }
        let description = cmd
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        Ok(Self {
            id: cmd.bundle_id,
            name: name.to_string(),
            description,
            price: cmd.price,
            stock: cmd.stock,
            is_active: cmd.is_active,
            sale_window: cmd.sale_window,
            created_at: cmd.occurred_at,
            updated_at: cmd.occurred_at,
            version: 1,
        })
    }

    /// Rebuild a bundle from persisted columns.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: BundleId,
        name: String,
        description: Option<String>,
        price: u64,
        stock: u32,
        is_active: bool,
        sale_window: Option<SaleWindow>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id,
            name,
            description,
            price,
            stock,
            is_active,
            sale_window,
            created_at,
            updated_at,
            version,
        }
    }

    pub fn id_typed(&self) -> BundleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn price(&self) -> u64 {
        self.price
    }

    pub fn stock(&self) -> u32 {
        self.stock
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_time_limited(&self) -> bool {
        self.sale_window.is_some()
    }

    pub fn sale_window(&self) -> Option<&SaleWindow> {
        self.sale_window.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Check every purchase precondition, in order, without mutating.
    ///
    /// Order: active flag, sales window, stock. The first failing check is
    /// the one reported.
    pub fn ensure_purchasable(&self, quantity: Quantity, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_active {
            return Err(DomainError::invalid_state("bundle is not active"));
        }
        if let Some(window) = &self.sale_window {
            window.ensure_open(now)?;
        }
        if self.stock < quantity.get() {
            return Err(DomainError::insufficient_stock(quantity.get(), self.stock));
        }
        Ok(())
    }

    /// Apply a purchase: validate, then reduce stock. Returns the remaining stock.
    ///
    /// On error the bundle is left untouched.
    pub fn decrement_stock(&mut self, quantity: Quantity, now: DateTime<Utc>) -> DomainResult<u32> {
        self.ensure_purchasable(quantity, now)?;

        self.stock -= quantity.get();
        self.updated_at = now;
        self.version += 1;
        Ok(self.stock)
    }
}

impl AggregateRoot for Bundle {
    type Id = BundleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn create_cmd(stock: u32) -> CreateBundle {
        CreateBundle {
            bundle_id: BundleId::generate(),
            name: "Starter Kit".to_string(),
            description: None,
            price: 4_999,
            stock,
            is_active: true,
            sale_window: None,
            occurred_at: test_time(),
        }
    }

    fn bundle_with_stock(stock: u32) -> Bundle {
        Bundle::create(&create_cmd(stock)).unwrap()
    }

    fn qty(n: u32) -> Quantity {
        Quantity::new(n).unwrap()
    }

    #[test]
    fn create_rejects_blank_name() {
        let mut cmd = create_cmd(1);
        cmd.name = "   ".to_string();
        assert!(matches!(Bundle::create(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn create_trims_name_and_drops_blank_description() {
        let mut cmd = create_cmd(1);
        cmd.name = "  Gift Box ".to_string();
        cmd.description = Some("  ".to_string());
        let bundle = Bundle::create(&cmd).unwrap();
        assert_eq!(bundle.name(), "Gift Box");
        assert_eq!(bundle.description(), None);
        assert_eq!(bundle.version(), 1);
    }

    #[test]
    fn decrement_reduces_stock() {
        let mut bundle = bundle_with_stock(5);
        let later = test_time() + Duration::minutes(5);

        let remaining = bundle.decrement_stock(qty(3), later).unwrap();

        assert_eq!(remaining, 2);
        assert_eq!(bundle.stock(), 2);
        assert_eq!(bundle.version(), 2);
        assert_eq!(bundle.updated_at(), later);
    }

    #[test]
    fn decrement_to_exactly_zero_is_allowed() {
        let mut bundle = bundle_with_stock(2);
        assert_eq!(bundle.decrement_stock(qty(2), test_time()).unwrap(), 0);
    }

    #[test]
    fn insufficient_stock_reports_available_and_leaves_state() {
        let mut bundle = bundle_with_stock(1);
        let before = bundle.clone();

        let err = bundle.decrement_stock(qty(4), test_time()).unwrap_err();

        assert_eq!(err, DomainError::insufficient_stock(4, 1));
        assert_eq!(bundle, before);
    }

    #[test]
    fn inactive_bundle_rejects_before_stock_check() {
        let mut cmd = create_cmd(0);
        cmd.is_active = false;
        let mut bundle = Bundle::create(&cmd).unwrap();

        let err = bundle.decrement_stock(qty(1), test_time()).unwrap_err();
        assert_eq!(err, DomainError::invalid_state("bundle is not active"));
    }

    #[test]
    fn closed_window_rejects_before_stock_check() {
        let not_started = SaleWindow::new(
            test_time() + Duration::days(1),
            test_time() + Duration::days(2),
        )
        .unwrap();
        let ended = SaleWindow::new(
            test_time() - Duration::days(2),
            test_time() - Duration::days(1),
        )
        .unwrap();

        for (window, expected) in [(not_started, "not started"), (ended, "ended")] {
            let mut cmd = create_cmd(0);
            cmd.sale_window = Some(window);
            let bundle = Bundle::create(&cmd).unwrap();

            match bundle.ensure_purchasable(qty(1), test_time()).unwrap_err() {
                DomainError::InvalidState(msg) => assert!(msg.contains(expected), "{msg}"),
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn price_must_fit_in_storage() {
        let mut cmd = create_cmd(1);
        cmd.price = Bundle::MAX_PRICE;
        assert!(Bundle::create(&cmd).is_ok());

        cmd.price = Bundle::MAX_PRICE + 1;
        assert!(matches!(
            Bundle::create(&cmd),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let start = test_time();
        let end = start + Duration::days(1);
        let window = SaleWindow::new(start, end).unwrap();

        assert!(window.contains(start));
        assert!(window.contains(end));
        assert!(!window.contains(start - Duration::seconds(1)));
        assert!(!window.contains(end + Duration::seconds(1)));
    }

    #[test]
    fn ended_window_rejects_purchase() {
        let mut cmd = create_cmd(10);
        cmd.sale_window = Some(
            SaleWindow::new(test_time() - Duration::days(7), test_time() - Duration::days(1))
                .unwrap(),
        );
        let mut bundle = Bundle::create(&cmd).unwrap();

        let err = bundle.decrement_stock(qty(1), test_time()).unwrap_err();
        match err {
            DomainError::InvalidState(msg) => assert!(msg.contains("ended")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(bundle.stock(), 10);
    }

    #[test]
    fn window_not_started_rejects_purchase() {
        let mut cmd = create_cmd(10);
        cmd.sale_window = Some(
            SaleWindow::new(test_time() + Duration::days(1), test_time() + Duration::days(2))
                .unwrap(),
        );
        let bundle = Bundle::create(&cmd).unwrap();

        let err = bundle.ensure_purchasable(qty(1), test_time()).unwrap_err();
        match err {
            DomainError::InvalidState(msg) => assert!(msg.contains("not started")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn window_requires_ordered_bounds() {
        let err = SaleWindow::new(test_time(), test_time() - Duration::hours(1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn from_flags_requires_both_dates_when_time_limited() {
        assert!(SaleWindow::from_flags(true, Some(test_time()), None).is_err());
        assert_eq!(SaleWindow::from_flags(false, Some(test_time()), None).unwrap(), None);
        assert!(
            SaleWindow::from_flags(true, Some(test_time()), Some(test_time()))
                .unwrap()
                .is_some()
        );
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: a bundle with no stock rejects every quantity and stays unchanged.
            #[test]
            fn empty_stock_always_rejects(quantity in 1u32..=10_000) {
                let mut bundle = bundle_with_stock(0);
                let before = bundle.clone();

                let result = bundle.decrement_stock(qty(quantity), test_time());

                prop_assert_eq!(result, Err(DomainError::insufficient_stock(quantity, 0)));
                prop_assert_eq!(bundle, before);
            }

            /// Property: any sequence of decrements conserves stock and never underflows.
            #[test]
            fn decrements_conserve_stock(
                initial in 0u32..1_000,
                requests in proptest::collection::vec(1u32..50, 0..64)
            ) {
                let mut bundle = bundle_with_stock(initial);
                let mut sold: u32 = 0;

                for q in requests {
                    let before = bundle.stock();
                    match bundle.decrement_stock(qty(q), test_time()) {
                        Ok(remaining) => {
                            prop_assert_eq!(remaining, before - q);
                            sold += q;
                        }
                        Err(e) => {
                            prop_assert_eq!(e, DomainError::insufficient_stock(q, before));
                            prop_assert_eq!(bundle.stock(), before);
                        }
                    }
                }

                prop_assert_eq!(bundle.stock() + sold, initial);
            }

            /// Property: inactive bundles reject regardless of stock.
            #[test]
            fn inactive_rejects_regardless_of_stock(stock in 0u32..10_000, quantity in 1u32..100) {
                let mut cmd = create_cmd(stock);
                cmd.is_active = false;
                let bundle = Bundle::create(&cmd).unwrap();

                prop_assert!(matches!(
                    bundle.ensure_purchasable(qty(quantity), test_time()),
                    Err(DomainError::InvalidState(_))
                ));
            }
        }
    }
}
