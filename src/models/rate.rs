use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::rates::RateWindow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StorageRate {
    pub id: Uuid,
    pub product_id: Uuid,
    pub rate: Decimal,
    pub effective_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RateWindow for StorageRate {
    fn product_id(&self) -> Uuid {
        self.product_id
    }

    fn rate(&self) -> Decimal {
        self.rate
    }

    fn effective_date(&self) -> DateTime<Utc> {
        self.effective_date
    }

    fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }
}

#[derive(Debug, Serialize, FromRow)]
pub struct StorageRateDisplay {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub rate: Decimal,
    pub effective_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl StorageRateDisplay {
    pub fn effective(&self) -> String {
        self.effective_date.format("%Y-%m-%d").to_string()
    }

    pub fn ends(&self) -> String {
        self.end_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "Open".to_string())
    }
}
