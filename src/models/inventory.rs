use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    filter::{MovementRecord, StockRecord},
    MovementType, ShippingNotes, StockCounters,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub location: Option<String>,
    pub qty_on_hand: i32,
    pub qty_allocated: i32,
    pub qty_received: i32,
    pub date_received: Option<DateTime<Utc>>,
    pub qty_shipped: i32,
    pub date_shipped: Option<DateTime<Utc>>,
    pub storage_rate: Decimal,
    pub last_audit_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn counters(&self) -> StockCounters {
        StockCounters {
            qty_on_hand: self.qty_on_hand,
            qty_received: self.qty_received,
            qty_shipped: self.qty_shipped,
            date_received: self.date_received,
            date_shipped: self.date_shipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: i64,
    pub url: String,
    pub upload_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Movement {
    pub id: Uuid,
    pub inventory_item_id: Uuid,
    pub movement_type: String,
    pub quantity: i32,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub attachments: Json<Vec<Attachment>>,
    pub date: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inventory item joined with its product and customer.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InventoryItemDisplay {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub category: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub location: Option<String>,
    pub qty_on_hand: i32,
    pub qty_allocated: i32,
    pub qty_received: i32,
    pub qty_shipped: i32,
    pub storage_rate: Decimal,
    pub last_audit_date: Option<DateTime<Utc>>,
}

impl InventoryItemDisplay {
    pub fn last_audit(&self) -> String {
        self.last_audit_date
            .map(|d| d.format("%b %-d, %Y").to_string())
            .unwrap_or_else(|| "Never".to_string())
    }
}

impl StockRecord for InventoryItemDisplay {
    fn customer_id(&self) -> Uuid {
        self.customer_id
    }

    fn product_name(&self) -> &str {
        &self.product_name
    }

    fn sku(&self) -> &str {
        &self.sku
    }

    fn qty_on_hand(&self) -> i32 {
        self.qty_on_hand
    }
}

/// Movement joined with the product and customer it belongs to.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MovementDisplay {
    pub id: Uuid,
    pub inventory_item_id: Uuid,
    pub movement_type: String,
    pub quantity: i32,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub attachments: Json<Vec<Attachment>>,
    pub date: DateTime<Utc>,
    pub product_id: Option<Uuid>,
    pub product_name: Option<String>,
    pub customer_id: Option<Uuid>,
    pub customer_name: Option<String>,
}

impl MovementDisplay {
    pub fn shipping(&self) -> ShippingNotes {
        ShippingNotes::parse(self.notes.as_deref().unwrap_or_default())
    }

    pub fn carrier(&self) -> String {
        self.shipping().carrier.unwrap_or_else(|| "-".to_string())
    }

    pub fn tracking(&self) -> String {
        self.shipping().tracking.unwrap_or_else(|| "-".to_string())
    }

    pub fn remarks(&self) -> String {
        self.shipping().remarks.unwrap_or_default()
    }

    pub fn product_label(&self) -> &str {
        self.product_name.as_deref().unwrap_or("Unknown Product")
    }

    pub fn customer_label(&self) -> &str {
        self.customer_name.as_deref().unwrap_or("-")
    }

    pub fn when(&self) -> String {
        self.date.format("%b %-d, %Y %H:%M").to_string()
    }

    pub fn attachment_list(&self) -> &[Attachment] {
        &self.attachments.0
    }
}

impl MovementRecord for MovementDisplay {
    fn moved_at(&self) -> DateTime<Utc> {
        self.date
    }

    fn kind(&self) -> Option<MovementType> {
        self.movement_type.parse().ok()
    }

    fn owner(&self) -> Option<(Uuid, Uuid)> {
        self.product_id.zip(self.customer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display(notes: Option<&str>) -> MovementDisplay {
        MovementDisplay {
            id: Uuid::new_v4(),
            inventory_item_id: Uuid::new_v4(),
            movement_type: "OUTBOUND".into(),
            quantity: 3,
            reference_number: None,
            notes: notes.map(str::to_string),
            attachments: Json(Vec::new()),
            date: Utc::now(),
            product_id: None,
            product_name: None,
            customer_id: None,
            customer_name: None,
        }
    }

    #[test]
    fn display_unpacks_shipping_notes() {
        let row = display(Some("UPS - 1Z55\nleave at dock 4"));
        assert_eq!(row.carrier(), "UPS");
        assert_eq!(row.tracking(), "1Z55");
        assert_eq!(row.remarks(), "leave at dock 4");
    }

    #[test]
    fn missing_details_render_as_dashes() {
        let row = display(None);
        assert_eq!(row.carrier(), "-");
        assert_eq!(row.tracking(), "-");
        assert_eq!(row.product_label(), "Unknown Product");
        assert_eq!(row.owner(), None);
    }
}
