use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use super::posting::MovementType;

/// Items at or below this quantity show up under the "low stock" filter.
pub const LOW_STOCK_THRESHOLD: i32 = 10;

/// Facts about a movement the list filters look at.
pub trait MovementRecord {
    fn moved_at(&self) -> DateTime<Utc>;
    fn kind(&self) -> Option<MovementType>;
    /// `(product_id, customer_id)` when the movement's product is known.
    fn owner(&self) -> Option<(Uuid, Uuid)>;
}

/// Facts about an inventory item the stock filters look at.
pub trait StockRecord {
    fn customer_id(&self) -> Uuid;
    fn product_name(&self) -> &str;
    fn sku(&self) -> &str;
    fn qty_on_hand(&self) -> i32;
}

/// Conjunction of the optional movement-list filters. Dates are UTC days,
/// both bounds inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub customer_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub kind: Option<MovementType>,
}

impl MovementFilter {
    pub fn is_active(&self) -> bool {
        self != &MovementFilter::default()
    }

    pub fn matches<M: MovementRecord>(&self, movement: &M) -> bool {
        let moved_at = movement.moved_at();

        if let Some(from) = self.from {
            if moved_at < from.and_time(NaiveTime::MIN).and_utc() {
                return false;
            }
        }
        if let Some(to) = self.to {
            let end_of_day = to
                .succ_opt()
                .map(|next| next.and_time(NaiveTime::MIN).and_utc());
            if let Some(end) = end_of_day {
                if moved_at >= end {
                    return false;
                }
            }
        }

        // Movements whose product cannot be resolved are not excluded by the
        // customer or product filters.
        if let Some((product_id, customer_id)) = movement.owner() {
            if self.customer_id.is_some_and(|id| id != customer_id) {
                return false;
            }
            if self.product_id.is_some_and(|id| id != product_id) {
                return false;
            }
        }

        match self.kind {
            Some(kind) => movement.kind() == Some(kind),
            None => true,
        }
    }

    /// Matching movements, newest first.
    pub fn apply<M: MovementRecord>(&self, movements: Vec<M>) -> Vec<M> {
        let mut kept: Vec<M> = movements.into_iter().filter(|m| self.matches(m)).collect();
        kept.sort_by_key(|m| std::cmp::Reverse(m.moved_at()));
        kept
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryFilter {
    pub customer_id: Option<Uuid>,
    pub search: Option<String>,
    pub low_stock_only: bool,
}

impl InventoryFilter {
    pub fn matches<S: StockRecord>(&self, item: &S) -> bool {
        if self.customer_id.is_some_and(|id| id != item.customer_id()) {
            return false;
        }
        if self.low_stock_only && item.qty_on_hand() > LOW_STOCK_THRESHOLD {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                item.product_name().to_lowercase().contains(&needle)
                    || item.sku().to_lowercase().contains(&needle)
            }
            _ => true,
        }
    }

    pub fn apply<S: StockRecord>(&self, items: Vec<S>) -> Vec<S> {
        items.into_iter().filter(|i| self.matches(i)).collect()
    }
}
