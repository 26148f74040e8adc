use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error("audit is already completed")]
    AlreadyCompleted,

    #[error("counted quantity cannot be negative")]
    NegativeCount,

    #[error("unknown audit status: {0}")]
    UnknownStatus(String),

    #[error("adjusting stock by the counted difference would leave a negative quantity; reload the sheet and recount")]
    NegativeStock,

    #[error("stock level would exceed what can be recorded")]
    CounterOverflow,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::InProgress => "in_progress",
            AuditStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AuditStatus::Completed)
    }

    /// The only transition an audit has: `in_progress` to `completed`.
    pub fn complete(self) -> Result<AuditStatus, AuditError> {
        match self {
            AuditStatus::InProgress => Ok(AuditStatus::Completed),
            AuditStatus::Completed => Err(AuditError::AlreadyCompleted),
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(AuditStatus::InProgress),
            "completed" => Ok(AuditStatus::Completed),
            other => Err(AuditError::UnknownStatus(other.to_string())),
        }
    }
}

/// Signed difference between what was counted and what the system recorded.
pub fn discrepancy(expected: i32, actual: i32) -> i32 {
    actual - expected
}

/// Badge text for the conduct and review pages.
pub fn describe_discrepancy(value: i32) -> String {
    match value {
        0 => "Match".to_string(),
        v if v > 0 => format!("+{v}"),
        v => v.to_string(),
    }
}

/// One line of a completed count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditCount {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub expected_qty: i32,
    pub actual_qty: i32,
    pub notes: Option<String>,
}

impl AuditCount {
    /// Build a count line; a missing entry means the operator confirmed the
    /// recorded quantity.
    pub fn new(
        item_id: Uuid,
        product_id: Uuid,
        expected_qty: i32,
        entered: Option<i32>,
        notes: Option<String>,
    ) -> Result<Self, AuditError> {
        let actual_qty = entered.unwrap_or(expected_qty);
        if actual_qty < 0 {
            return Err(AuditError::NegativeCount);
        }
        Ok(Self {
            item_id,
            product_id,
            expected_qty,
            actual_qty,
            notes: notes.filter(|n| !n.trim().is_empty()),
        })
    }

    pub fn discrepancy(&self) -> i32 {
        discrepancy(self.expected_qty, self.actual_qty)
    }
}

/// Totals persisted on the audit row at completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuditSummary {
    pub items_count: i32,
    pub discrepancies_count: i32,
}

impl AuditSummary {
    pub fn from_counts(counts: &[AuditCount]) -> Self {
        let discrepancies = counts.iter().filter(|c| c.discrepancy() != 0).count();
        Self {
            items_count: i32::try_from(counts.len()).unwrap_or(i32::MAX),
            discrepancies_count: i32::try_from(discrepancies).unwrap_or(i32::MAX),
        }
    }
}

/// Stock correction written when an audit is completed with adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockAdjustment {
    pub item_id: Uuid,
    /// Signed ADJUSTMENT quantity.
    pub quantity: i32,
    pub qty_on_hand: i32,
}

/// Everything completing an audit writes besides the count lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionPlan {
    pub summary: AuditSummary,
    pub adjustments: Vec<StockAdjustment>,
}

/// Plan an audit's completion. Each count is paired with the item's
/// quantity at completion time, which may differ from what the sheet showed
/// if movements were posted during the count.
///
/// Adjustments add the discrepancy to the current quantity, so those
/// movements survive.
pub fn plan_completion(lines: &[(AuditCount, i32)], apply_adjustments: bool) -> Result<CompletionPlan, AuditError> {
    let counts: Vec<AuditCount> = lines.iter().map(|(count, _)| count.clone()).collect();
    let summary = AuditSummary::from_counts(&counts);

    let mut adjustments = Vec::new();
    if apply_adjustments {
        for (count, qty_on_hand) in lines.iter().filter(|(count, _)| count.discrepancy() != 0) {
            let corrected = qty_on_hand
                .checked_add(count.discrepancy())
                .ok_or(AuditError::CounterOverflow)?;
            if corrected < 0 {
                return Err(AuditError::NegativeStock);
            }
            adjustments.push(StockAdjustment {
                item_id: count.item_id,
                quantity: count.discrepancy(),
                qty_on_hand: corrected,
            });
        }
    }

    Ok(CompletionPlan {
        summary,
        adjustments,
    })
}
