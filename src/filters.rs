use std::fmt::Display;

use askama::Result;
use chrono::{DateTime, Utc};

// Custom template filters, used as `|money` and `|day`.

/// Format an amount with two decimals and a dollar sign.
#[allow(clippy::unnecessary_wraps)]
pub fn money<T: Display>(value: T) -> Result<String> {
    Ok(format!("${:.2}", value))
}

/// Calendar date used across list pages.
#[allow(clippy::unnecessary_wraps)]
pub fn day(value: &DateTime<Utc>) -> Result<String> {
    Ok(value.format("%b %-d, %Y").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    #[test]
    fn money_uses_two_decimals() {
        assert_eq!(money(Decimal::new(255, 1)).unwrap(), "$25.50");
        assert_eq!(money(Decimal::new(1210, 2)).unwrap(), "$12.10");
    }

    #[test]
    fn day_is_short_month_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 15, 0, 0).unwrap();
        assert_eq!(day(&at).unwrap(), "Mar 7, 2024");
    }
}
