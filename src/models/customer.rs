use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerDocument {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub logo_url: Option<String>,
    pub documents: Json<Vec<CustomerDocument>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Entry in a customer picker.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CustomerOption {
    pub id: Uuid,
    pub name: String,
}

// Template-friendly display version for listing and detail views
#[derive(Debug, Default, Serialize)]
pub struct CustomerDisplay {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub logo_url: String,
    pub documents: Vec<CustomerDocument>,
    pub active: bool,
    pub created_at: String,
}

impl From<Customer> for CustomerDisplay {
    fn from(customer: Customer) -> Self {
        Self {
            id: customer.id,
            name: customer.name,
            code: customer.code,
            contact_name: customer.contact_name.unwrap_or_default(),
            contact_email: customer.contact_email.unwrap_or_default(),
            contact_phone: customer.contact_phone.unwrap_or_default(),
            logo_url: customer.logo_url.unwrap_or_default(),
            documents: customer.documents.0,
            active: customer.active,
            created_at: customer.created_at.format("%b %-d, %Y").to_string(),
        }
    }
}
