use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;

use super::posting::MovementType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonthlyFlow {
    pub inbound: i64,
    pub outbound: i64,
}

/// Units moved in and out during the calendar month containing `now`.
pub fn monthly_flow<I>(movements: I, now: DateTime<Utc>) -> MonthlyFlow
where
    I: IntoIterator<Item = (DateTime<Utc>, MovementType, i32)>,
{
    movements
        .into_iter()
        .filter(|(at, _, _)| at.year() == now.year() && at.month() == now.month())
        .fold(MonthlyFlow::default(), |mut flow, (_, kind, qty)| {
            match kind {
                MovementType::Inbound => flow.inbound += i64::from(qty),
                MovementType::Outbound => flow.outbound += i64::from(qty),
                MovementType::Adjustment => {}
            }
            flow
        })
}

/// Storage revenue: on-hand units times each item's rate.
pub fn storage_revenue<I>(items: I) -> Decimal
where
    I: IntoIterator<Item = (i32, Decimal)>,
{
    items
        .into_iter()
        .map(|(qty, rate)| Decimal::from(qty) * rate)
        .sum()
}

/// On-hand units and storage charges grouped under a key (category, customer).
pub fn group_totals<K, I>(items: I) -> BTreeMap<K, (i64, Decimal)>
where
    K: Ord,
    I: IntoIterator<Item = (K, i32, Decimal)>,
{
    let mut totals: BTreeMap<K, (i64, Decimal)> = BTreeMap::new();
    for (key, qty, rate) in items {
        let entry = totals.entry(key).or_insert((0, Decimal::ZERO));
        entry.0 += i64::from(qty);
        entry.1 += Decimal::from(qty) * rate;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn monthly_flow_only_counts_current_month() {
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();
        let movements = vec![
            (Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(), MovementType::Inbound, 10),
            (Utc.with_ymd_and_hms(2024, 5, 31, 23, 0, 0).unwrap(), MovementType::Outbound, 3),
            (Utc.with_ymd_and_hms(2024, 4, 30, 23, 0, 0).unwrap(), MovementType::Inbound, 100),
            (Utc.with_ymd_and_hms(2023, 5, 10, 0, 0, 0).unwrap(), MovementType::Outbound, 100),
            (Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(), MovementType::Adjustment, -2),
        ];
        assert_eq!(monthly_flow(movements, now), MonthlyFlow { inbound: 10, outbound: 3 });
    }

    #[test]
    fn revenue_multiplies_quantity_by_rate() {
        let items = vec![(4, Decimal::new(2500, 2)), (2, Decimal::new(1050, 2))];
        assert_eq!(storage_revenue(items), Decimal::new(12100, 2));
    }

    #[test]
    fn group_totals_sum_per_key() {
        let totals = group_totals(vec![
            ("Bucket", 2, Decimal::TEN),
            ("Bucket", 3, Decimal::ONE),
            ("Backhoe", 1, Decimal::new(25, 0)),
        ]);
        assert_eq!(totals["Bucket"], (5, Decimal::new(23, 0)));
        assert_eq!(totals["Backhoe"], (1, Decimal::new(25, 0)));
    }
}
