use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Rate charged when a product has no effective storage rate.
pub fn default_storage_rate() -> Decimal {
    Decimal::new(2500, 2)
}

/// A rate and the window it applies to.
pub trait RateWindow {
    fn product_id(&self) -> Uuid;
    fn rate(&self) -> Decimal;
    fn effective_date(&self) -> DateTime<Utc>;
    fn end_date(&self) -> Option<DateTime<Utc>>;

    fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_date() <= at && self.end_date().map_or(true, |end| at < end)
    }
}

/// The rate in force for `product_id` at `at`: the latest window that has
/// started and not yet ended, else the default rate.
pub fn current_rate<R: RateWindow>(rates: &[R], product_id: Uuid, at: DateTime<Utc>) -> Decimal {
    rates
        .iter()
        .filter(|r| r.product_id() == product_id && r.is_effective_at(at))
        .max_by_key(|r| r.effective_date())
        .map(RateWindow::rate)
        .unwrap_or_else(default_storage_rate)
}

/// Checks applied to rate input before it is stored.
pub fn validate_window(
    rate: Decimal,
    effective_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
) -> Result<(), &'static str> {
    if rate.is_sign_negative() {
        return Err("Storage rate cannot be negative");
    }
    if end_date.is_some_and(|end| end <= effective_date) {
        return Err("End date must be after the effective date");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    struct Rate {
        product: Uuid,
        rate: Decimal,
        from: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    }

    impl RateWindow for Rate {
        fn product_id(&self) -> Uuid {
            self.product
        }
        fn rate(&self) -> Decimal {
            self.rate
        }
        fn effective_date(&self) -> DateTime<Utc> {
            self.from
        }
        fn end_date(&self) -> Option<DateTime<Utc>> {
            self.until
        }
    }

    fn jan(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn falls_back_to_default_rate() {
        let rates: Vec<Rate> = Vec::new();
        assert_eq!(current_rate(&rates, Uuid::new_v4(), jan(1)), Decimal::new(2500, 2));
    }

    #[test]
    fn latest_started_window_wins() {
        let product = Uuid::new_v4();
        let rates = vec![
            Rate { product, rate: Decimal::new(1000, 2), from: jan(1), until: None },
            Rate { product, rate: Decimal::new(1500, 2), from: jan(10), until: None },
            Rate { product, rate: Decimal::new(9900, 2), from: jan(20), until: None },
        ];
        assert_eq!(current_rate(&rates, product, jan(15)), Decimal::new(1500, 2));
    }

    #[test]
    fn ended_windows_and_other_products_are_ignored() {
        let product = Uuid::new_v4();
        let rates = vec![
            Rate { product, rate: Decimal::new(1000, 2), from: jan(1), until: Some(jan(5)) },
            Rate { product: Uuid::new_v4(), rate: Decimal::new(1, 0), from: jan(1), until: None },
        ];
        assert_eq!(current_rate(&rates, product, jan(4)), Decimal::new(1000, 2));
        assert_eq!(current_rate(&rates, product, jan(5)), default_storage_rate());
    }

    #[test]
    fn window_validation() {
        assert!(validate_window(Decimal::new(-1, 0), jan(1), None).is_err());
        assert!(validate_window(Decimal::ONE, jan(2), Some(jan(1))).is_err());
        assert!(validate_window(Decimal::ONE, jan(1), Some(jan(1) + Duration::days(1))).is_ok());
    }
}
