use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Direction of a stock movement.
///
/// `Adjustment` is never offered on the posting form; audit reconciliation
/// writes it with a signed quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Inbound,
    Outbound,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Inbound => "INBOUND",
            MovementType::Outbound => "OUTBOUND",
            MovementType::Adjustment => "ADJUSTMENT",
        }
    }

    /// Signed change this movement applies to qty-on-hand.
    pub fn signed(&self, quantity: i32) -> i64 {
        match self {
            MovementType::Inbound | MovementType::Adjustment => i64::from(quantity),
            MovementType::Outbound => -i64::from(quantity),
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = PostingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INBOUND" => Ok(MovementType::Inbound),
            "OUTBOUND" => Ok(MovementType::Outbound),
            "ADJUSTMENT" => Ok(MovementType::Adjustment),
            other => Err(PostingError::UnknownType(other.to_string())),
        }
    }
}

/// The part of an inventory item the posting rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockSnapshot {
    pub item_id: Uuid,
    pub qty_on_hand: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostingError {
    #[error("quantity must be at least 1")]
    InvalidQuantity,

    #[error("unknown movement type: {0}")]
    UnknownType(String),

    #[error("adjustments are only written by audits")]
    ManualAdjustment,

    #[error("cannot ship a product with no tracked stock")]
    UntrackedProduct,

    #[error("insufficient stock: {available} available, {requested} requested")]
    InsufficientStock { available: i32, requested: i32 },

    #[error("quantity cannot exceed {} units per line", MAX_LINE_QUANTITY)]
    QuantityTooLarge,

    #[error("stock level would exceed what can be recorded")]
    CounterOverflow,
}

/// Largest quantity one posting line may carry.
pub const MAX_LINE_QUANTITY: i32 = 1_000_000;

/// Running counters an inventory item keeps alongside its ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StockCounters {
    pub qty_on_hand: i32,
    pub qty_received: i32,
    pub qty_shipped: i32,
    pub date_received: Option<DateTime<Utc>>,
    pub date_shipped: Option<DateTime<Utc>>,
}

impl StockCounters {
    /// Counters after posting `quantity` units of `kind` dated `at`.
    ///
    /// Inbound adds to on-hand and received; outbound takes from on-hand
    /// and adds to shipped. The matching date is set to the posting date.
    pub fn apply(self, kind: MovementType, quantity: i32, at: DateTime<Utc>) -> Result<Self, PostingError> {
        if quantity < 1 {
            return Err(PostingError::InvalidQuantity);
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(PostingError::QuantityTooLarge);
        }
        match kind {
            MovementType::Adjustment => Err(PostingError::ManualAdjustment),
            MovementType::Inbound => Ok(Self {
                qty_on_hand: self.qty_on_hand.checked_add(quantity).ok_or(PostingError::CounterOverflow)?,
                qty_received: self.qty_received.checked_add(quantity).ok_or(PostingError::CounterOverflow)?,
                date_received: Some(at),
                ..self
            }),
            MovementType::Outbound if quantity > self.qty_on_hand => Err(PostingError::InsufficientStock {
                available: self.qty_on_hand,
                requested: quantity,
            }),
            MovementType::Outbound => Ok(Self {
                qty_on_hand: self.qty_on_hand - quantity,
                qty_shipped: self.qty_shipped.checked_add(quantity).ok_or(PostingError::CounterOverflow)?,
                date_shipped: Some(at),
                ..self
            }),
        }
    }
}

/// One line of a posting after it has been checked against stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedLine {
    pub product_id: Uuid,
    pub quantity: i32,
    /// The item has to be created before the movement can reference it.
    pub creates_item: bool,
    pub before: StockCounters,
    pub after: StockCounters,
}

/// Check every `(product, quantity)` line of one posting against the locked
/// stock, in order. Lines for the same product see each other's effect.
///
/// `stock` holds every product the posting touches; `None` means the product
/// has no inventory item yet. Nothing is staged unless every line passes: the
/// first rejected line is returned with its product.
pub fn stage_posting(
    kind: MovementType,
    lines: &[(Uuid, i32)],
    stock: &HashMap<Uuid, Option<StockCounters>>,
    at: DateTime<Utc>,
) -> Result<Vec<StagedLine>, (Uuid, PostingError)> {
    let mut running: HashMap<Uuid, StockCounters> = HashMap::new();
    let mut staged = Vec::with_capacity(lines.len());

    for &(product_id, quantity) in lines {
        let current = running
            .get(&product_id)
            .copied()
            .or_else(|| stock.get(&product_id).copied().flatten());
        let snapshot = current.map(|c| StockSnapshot {
            item_id: Uuid::nil(),
            qty_on_hand: c.qty_on_hand,
        });

        let plan = plan_posting(kind, snapshot, quantity).map_err(|e| (product_id, e))?;
        let before = current.unwrap_or_default();
        let after = before.apply(kind, quantity, at).map_err(|e| (product_id, e))?;

        staged.push(StagedLine {
            product_id,
            quantity,
            creates_item: plan == PostingPlan::CreateItemThenPost,
            before,
            after,
        });
        running.insert(product_id, after);
    }
    Ok(staged)
}

/// What has to happen in storage for a posting line to go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingPlan {
    /// No item exists yet: create one at zero, then append the movement.
    CreateItemThenPost,
    /// Append the movement to an existing item.
    Post { item_id: Uuid },
}

/// Decide whether a movement of `quantity` units may be posted against the
/// product whose current stock is `existing`.
pub fn plan_posting(
    kind: MovementType,
    existing: Option<StockSnapshot>,
    quantity: i32,
) -> Result<PostingPlan, PostingError> {
    if quantity < 1 {
        return Err(PostingError::InvalidQuantity);
    }

    match (kind, existing) {
        (MovementType::Adjustment, _) => Err(PostingError::ManualAdjustment),
        (MovementType::Outbound, None) => Err(PostingError::UntrackedProduct),
        (MovementType::Inbound, None) => Ok(PostingPlan::CreateItemThenPost),
        (MovementType::Outbound, Some(stock)) if quantity > stock.qty_on_hand => {
            Err(PostingError::InsufficientStock {
                available: stock.qty_on_hand,
                requested: quantity,
            })
        }
        (_, Some(stock)) => Ok(PostingPlan::Post {
            item_id: stock.item_id,
        }),
    }
}

/// Net quantity a ledger of movements adds up to.
pub fn ledger_balance<I>(movements: I) -> i64
where
    I: IntoIterator<Item = (MovementType, i32)>,
{
    movements
        .into_iter()
        .map(|(kind, quantity)| kind.signed(quantity))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stock(qty_on_hand: i32) -> StockSnapshot {
        StockSnapshot {
            item_id: Uuid::nil(),
            qty_on_hand,
        }
    }

    #[test]
    fn outbound_without_item_is_rejected() {
        assert_eq!(
            plan_posting(MovementType::Outbound, None, 1),
            Err(PostingError::UntrackedProduct)
        );
    }

    #[test]
    fn outbound_is_limited_by_qty_on_hand() {
        assert_eq!(
            plan_posting(MovementType::Outbound, Some(stock(5)), 6),
            Err(PostingError::InsufficientStock {
                available: 5,
                requested: 6
            })
        );
        assert_eq!(
            plan_posting(MovementType::Outbound, Some(stock(5)), 5),
            Ok(PostingPlan::Post {
                item_id: Uuid::nil()
            })
        );
    }

    #[test]
    fn inbound_without_item_creates_one_first() {
        assert_eq!(
            plan_posting(MovementType::Inbound, None, 12),
            Ok(PostingPlan::CreateItemThenPost)
        );
    }

    #[test]
    fn zero_and_negative_quantities_are_invalid() {
        assert_eq!(
            plan_posting(MovementType::Inbound, None, 0),
            Err(PostingError::InvalidQuantity)
        );
        assert_eq!(
            plan_posting(MovementType::Outbound, Some(stock(10)), -3),
            Err(PostingError::InvalidQuantity)
        );
    }

    #[test]
    fn adjustments_cannot_be_posted_by_hand() {
        assert_eq!(
            plan_posting(MovementType::Adjustment, Some(stock(1)), 1),
            Err(PostingError::ManualAdjustment)
        );
    }

    #[test]
    fn movement_type_parses_case_insensitively() {
        assert_eq!("inbound".parse::<MovementType>(), Ok(MovementType::Inbound));
        assert_eq!(" OUTBOUND ".parse::<MovementType>(), Ok(MovementType::Outbound));
        assert!("TRANSFER".parse::<MovementType>().is_err());
    }

    #[test]
    fn ledger_balance_nets_directions() {
        let ledger = vec![
            (MovementType::Inbound, 10),
            (MovementType::Outbound, 4),
            (MovementType::Adjustment, -1),
        ];
        assert_eq!(ledger_balance(ledger), 5);
    }

    fn at() -> DateTime<Utc> {
        "2024-05-02T09:00:00Z".parse().unwrap()
    }

    #[test]
    fn inbound_raises_on_hand_and_received() {
        let start = StockCounters {
            qty_on_hand: 4,
            qty_received: 10,
            qty_shipped: 6,
            ..Default::default()
        };
        let after = start.apply(MovementType::Inbound, 5, at()).unwrap();
        assert_eq!(after.qty_on_hand, 9);
        assert_eq!(after.qty_received, 15);
        assert_eq!(after.qty_shipped, 6);
        assert_eq!(after.date_received, Some(at()));
        assert_eq!(after.date_shipped, None);
    }

    #[test]
    fn outbound_lowers_on_hand_and_raises_shipped() {
        let start = StockCounters {
            qty_on_hand: 4,
            qty_received: 4,
            ..Default::default()
        };
        let after = start.apply(MovementType::Outbound, 4, at()).unwrap();
        assert_eq!(after.qty_on_hand, 0);
        assert_eq!(after.qty_shipped, 4);
        assert_eq!(after.date_shipped, Some(at()));

        assert_eq!(
            after.apply(MovementType::Outbound, 1, at()),
            Err(PostingError::InsufficientStock {
                available: 0,
                requested: 1
            })
        );
    }

    #[test]
    fn oversized_quantities_are_rejected_before_counters_move() {
        let start = StockCounters::default();
        assert_eq!(
            start.apply(MovementType::Inbound, MAX_LINE_QUANTITY + 1, at()),
            Err(PostingError::QuantityTooLarge)
        );

        let nearly_full = StockCounters {
            qty_on_hand: i32::MAX - 10,
            qty_received: i32::MAX - 10,
            ..Default::default()
        };
        assert_eq!(
            nearly_full.apply(MovementType::Inbound, 11, at()),
            Err(PostingError::CounterOverflow)
        );
    }

    #[test]
    fn one_bad_line_rejects_the_whole_posting() {
        let stocked = Uuid::new_v4();
        let short = Uuid::new_v4();
        let stock = HashMap::from([
            (stocked, Some(StockCounters { qty_on_hand: 20, ..Default::default() })),
            (short, Some(StockCounters { qty_on_hand: 2, ..Default::default() })),
        ]);

        let err = stage_posting(MovementType::Outbound, &[(stocked, 5), (short, 3)], &stock, at()).unwrap_err();
        assert_eq!(
            err,
            (
                short,
                PostingError::InsufficientStock {
                    available: 2,
                    requested: 3
                }
            )
        );
    }

    #[test]
    fn repeated_product_lines_draw_on_the_same_stock() {
        let product = Uuid::new_v4();
        let stock = HashMap::from([(product, Some(StockCounters { qty_on_hand: 6, ..Default::default() }))]);

        let staged = stage_posting(MovementType::Outbound, &[(product, 4), (product, 2)], &stock, at()).unwrap();
        assert_eq!(staged[1].before.qty_on_hand, 2);
        assert_eq!(staged[1].after.qty_on_hand, 0);

        let err = stage_posting(MovementType::Outbound, &[(product, 4), (product, 3)], &stock, at()).unwrap_err();
        assert_eq!(
            err.1,
            PostingError::InsufficientStock {
                available: 2,
                requested: 3
            }
        );
    }

    #[test]
    fn first_inbound_creates_the_item_once() {
        let product = Uuid::new_v4();
        let stock = HashMap::from([(product, None)]);

        let staged = stage_posting(MovementType::Inbound, &[(product, 3), (product, 2)], &stock, at()).unwrap();
        assert!(staged[0].creates_item);
        assert!(!staged[1].creates_item);
        assert_eq!(staged[0].before, StockCounters::default());
        assert_eq!(staged[1].after.qty_on_hand, 5);
        assert_eq!(staged[1].after.qty_received, 5);
    }

    #[test]
    fn outbound_of_untracked_product_is_rejected_in_a_batch() {
        let product = Uuid::new_v4();
        let stock = HashMap::from([(product, None)]);
        assert_eq!(
            stage_posting(MovementType::Outbound, &[(product, 1)], &stock, at()),
            Err((product, PostingError::UntrackedProduct))
        );
    }

    proptest! {
        #[test]
        fn outbound_accepted_iff_stock_covers_it(on_hand in 0i32..10_000, requested in 1i32..10_000) {
            let plan = plan_posting(MovementType::Outbound, Some(stock(on_hand)), requested);
            prop_assert_eq!(plan.is_ok(), requested <= on_hand);
            if plan.is_ok() {
                let after = i64::from(on_hand) + MovementType::Outbound.signed(requested);
                prop_assert!(after >= 0);
            }
        }

        #[test]
        fn counters_stay_consistent_with_the_ledger(
            steps in proptest::collection::vec((any::<bool>(), 1i32..500), 0..40)
        ) {
            let mut counters = StockCounters::default();
            let mut ledger = Vec::new();
            for (inbound, quantity) in steps {
                let kind = if inbound { MovementType::Inbound } else { MovementType::Outbound };
                if let Ok(next) = counters.apply(kind, quantity, at()) {
                    counters = next;
                    ledger.push((kind, quantity));
                }
            }
            prop_assert!(counters.qty_on_hand >= 0);
            prop_assert_eq!(i64::from(counters.qty_on_hand), ledger_balance(ledger));
            prop_assert_eq!(counters.qty_on_hand, counters.qty_received - counters.qty_shipped);
        }
    }
}
