use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::domain::{audit::describe_discrepancy, AuditStatus};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Audit {
    pub id: Uuid,
    pub customer_id: Option<Uuid>,
    pub status: String,
    pub date: DateTime<Utc>,
    pub performed_by: Uuid,
    pub notes: Option<String>,
    pub items_count: i32,
    pub discrepancies_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditItem {
    pub id: Uuid,
    pub audit_id: Uuid,
    pub product_id: Uuid,
    pub expected_qty: i32,
    pub actual_qty: i32,
    pub notes: Option<String>,
}

/// Audit row with the customer and operator names resolved.
#[derive(Debug, Serialize, FromRow)]
pub struct AuditDisplay {
    pub id: Uuid,
    pub customer_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub status: String,
    pub date: DateTime<Utc>,
    pub performed_by_name: String,
    pub notes: Option<String>,
    pub items_count: i32,
    pub discrepancies_count: i32,
}

impl AuditDisplay {
    pub fn scope(&self) -> &str {
        self.customer_name.as_deref().unwrap_or("All customers")
    }

    pub fn when(&self) -> String {
        self.date.format("%b %-d, %Y %H:%M").to_string()
    }

    pub fn is_completed(&self) -> bool {
        self.status
            .parse::<AuditStatus>()
            .is_ok_and(|status| status.is_terminal())
    }

    pub fn notes_text(&self) -> &str {
        self.notes.as_deref().unwrap_or_default()
    }
}

/// A row on the conduct page: one in-scope item and its recorded quantity.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub category: String,
    pub qty_on_hand: i32,
}

/// A stored result row with its product name.
#[derive(Debug, Serialize, FromRow)]
pub struct AuditResultDisplay {
    pub product_id: Uuid,
    pub product_name: String,
    pub expected_qty: i32,
    pub actual_qty: i32,
    pub notes: Option<String>,
}

impl AuditResultDisplay {
    pub fn discrepancy(&self) -> i32 {
        self.actual_qty - self.expected_qty
    }

    pub fn badge(&self) -> String {
        describe_discrepancy(self.discrepancy())
    }

    pub fn notes_text(&self) -> &str {
        self.notes.as_deref().unwrap_or_default()
    }
}
