use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductCategory {
    WoodChipper,
    Bucket,
    StumpGrinder,
    Backhoe,
    Excavator,
    SpareParts,
}

impl ProductCategory {
    pub const ALL: [ProductCategory; 6] = [
        ProductCategory::WoodChipper,
        ProductCategory::Bucket,
        ProductCategory::StumpGrinder,
        ProductCategory::Backhoe,
        ProductCategory::Excavator,
        ProductCategory::SpareParts,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ProductCategory::WoodChipper => "Wood Chipper",
            ProductCategory::Bucket => "Bucket",
            ProductCategory::StumpGrinder => "Stump Grinder",
            ProductCategory::Backhoe => "Backhoe",
            ProductCategory::Excavator => "Excavator",
            ProductCategory::SpareParts => "Spare Parts",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }

    pub fn labels() -> Vec<&'static str> {
        Self::ALL.iter().map(ProductCategory::label).collect()
    }
}

impl fmt::Display for ProductCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductImage {
    pub id: Uuid,
    pub url: String,
    pub alt: Option<String>,
    pub primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub sku: String,
    pub category: String,
    pub customer_id: Uuid,
    pub description: Option<String>,
    pub dimensions: Option<String>,
    pub weight: Option<Decimal>,
    pub images: Json<Vec<ProductImage>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Set `image_id` as the only primary image. Returns false when it is not
/// one of the product's images.
pub fn mark_primary(images: &mut [ProductImage], image_id: Uuid) -> bool {
    if !images.iter().any(|i| i.id == image_id) {
        return false;
    }
    for image in images.iter_mut() {
        image.primary = image.id == image_id;
    }
    true
}

/// Entry in a product picker.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProductOption {
    pub id: Uuid,
    pub name: String,
    pub sku: String,
}

/// Product row joined with its customer, flattened for templates.
#[derive(Debug, Default, Serialize, FromRow)]
pub struct ProductDisplay {
    pub id: Uuid,
    pub name: String,
    pub sku: String,
    pub category: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub description: String,
    pub dimensions: String,
    pub weight: String,
    pub active: bool,
    pub qty_on_hand: i32,
}
