use axum::{
    extract::{Form, Path, Query, State},
    response::{Html, Redirect},
};
use askama::Template;
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    domain::{
        filter::LOW_STOCK_THRESHOLD, metrics::storage_revenue, posting::ledger_balance,
        InventoryFilter, MovementType,
    },
    error::{AppError, AppResult},
    middleware::{require_user, CurrentUser},
    filters,
    models::{InventoryItem, InventoryItemDisplay},
    state::AppState,
};

use super::{
    blank_to_none, customer_choices, optional_uuid, parse_decimal, parse_quantity, render, with_notice,
    Choice, Flash,
};

const TABLE: &str = "inventory_items";

pub(crate) const ITEM_SELECT: &str = r#"
    SELECT i.id, i.product_id, p.name AS product_name, p.sku, p.category,
           p.customer_id, c.name AS customer_name,
           i.location, i.qty_on_hand, i.qty_allocated, i.qty_received, i.qty_shipped,
           i.storage_rate, i.last_audit_date
    FROM inventory_items i
    JOIN products p ON p.id = i.product_id
    JOIN customers c ON c.id = p.customer_id
"#;

#[derive(Template)]
#[template(path = "inventory/items.html")]
struct ItemsTemplate {
    current_user: CurrentUser,
    items: Vec<InventoryItemDisplay>,
    customers: Vec<Choice>,
    query: InventoryQuery,
    total_units: i64,
    monthly_charges: Decimal,
    low_stock_threshold: i32,
    notice: String,
}

#[derive(Template)]
#[template(path = "inventory/item_form.html")]
struct ItemFormTemplate {
    current_user: CurrentUser,
    item: InventoryItemDisplay,
}

#[derive(Debug, Default, Deserialize)]
pub struct InventoryQuery {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub search: String,
    pub low_stock: Option<String>,
}

impl InventoryQuery {
    pub fn to_filter(&self) -> InventoryFilter {
        InventoryFilter {
            customer_id: optional_uuid(&self.customer_id),
            search: blank_to_none(Some(self.search.clone())),
            low_stock_only: self.low_stock.is_some(),
        }
    }
}

#[derive(Deserialize)]
pub struct ItemForm {
    qty_on_hand: String,
    storage_rate: String,
    location: Option<String>,
}

struct ItemChange {
    qty_on_hand: i32,
    storage_rate: Decimal,
    location: Option<String>,
}

impl ItemForm {
    fn validated(self) -> AppResult<ItemChange> {
        let qty_on_hand = parse_quantity(&self.qty_on_hand, "Quantity on hand")?;
        if qty_on_hand < 0 {
            return Err(AppError::validation("Quantity on hand cannot be negative"));
        }
        let storage_rate = parse_decimal(&self.storage_rate, "Storage rate")?;
        if storage_rate.is_sign_negative() {
            return Err(AppError::validation("Storage rate cannot be negative"));
        }
        Ok(ItemChange {
            qty_on_hand,
            storage_rate,
            location: blank_to_none(self.location),
        })
    }
}

pub async fn items_list(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<InventoryQuery>,
    Query(flash): Query<Flash>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let items = query.to_filter().apply(load_items(&state.db).await?);

    let total_units: i64 = items.iter().map(|i| i64::from(i.qty_on_hand)).sum();
    let monthly_charges = storage_revenue(items.iter().map(|i| (i.qty_on_hand, i.storage_rate)));

    render(&ItemsTemplate {
        current_user,
        items,
        customers: customer_choices(&state.db, &query.customer_id).await?,
        query,
        total_units,
        monthly_charges,
        low_stock_threshold: LOW_STOCK_THRESHOLD,
        notice: flash.notice,
    })
}

pub(crate) async fn load_items(db: &Database) -> AppResult<Vec<InventoryItemDisplay>> {
    Ok(
        sqlx::query_as::<_, InventoryItemDisplay>(&format!("{ITEM_SELECT} ORDER BY p.name"))
            .fetch_all(db)
            .await?,
    )
}

pub async fn item_edit_form(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(item_id): Path<Uuid>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let item = sqlx::query_as::<_, InventoryItemDisplay>(&format!("{ITEM_SELECT} WHERE i.id = $1"))
        .bind(item_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("Inventory item"))?;

    render(&ItemFormTemplate { current_user, item })
}

/// Manual override of an item's stock figures. The movement ledger is left
/// alone; a quantity that no longer matches it is logged.
pub async fn update_item(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(item_id): Path<Uuid>,
    Form(form): Form<ItemForm>,
) -> AppResult<Redirect> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let change = form.validated()?;

    let before = sqlx::query_as::<_, InventoryItem>("SELECT * FROM inventory_items WHERE id = $1")
        .bind(item_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("Inventory item"))?;

    let after = sqlx::query_as::<_, InventoryItem>(
        r#"
        UPDATE inventory_items
        SET qty_on_hand = $1, storage_rate = $2, location = $3, updated_at = NOW()
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(change.qty_on_hand)
    .bind(change.storage_rate)
    .bind(&change.location)
    .bind(item_id)
    .fetch_one(&state.db)
    .await?;

    if before.qty_on_hand != after.qty_on_hand {
        let ledger = ledger_for(&state.db, item_id).await?;
        if ledger != i64::from(after.qty_on_hand) {
            log::warn!(
                "{} set item {} to {} on hand; movement ledger says {}",
                current_user.email,
                item_id,
                after.qty_on_hand,
                ledger
            );
        }
    }

    state.feed.updated(TABLE, &before, &after);
    Ok(Redirect::to(&with_notice("/inventory", "Inventory item updated")))
}

async fn ledger_for(db: &Database, item_id: Uuid) -> AppResult<i64> {
    let rows = sqlx::query_as::<_, (String, i32)>(
        "SELECT movement_type, quantity FROM inventory_movements WHERE inventory_item_id = $1",
    )
    .bind(item_id)
    .fetch_all(db)
    .await?;

    Ok(ledger_balance(rows.into_iter().filter_map(|(kind, qty)| {
        kind.parse::<MovementType>().ok().map(|kind| (kind, qty))
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_builds_inventory_filter() {
        let customer = Uuid::new_v4();
        let query = InventoryQuery {
            customer_id: customer.to_string(),
            search: " chipper ".into(),
            low_stock: Some("on".into()),
        };
        let filter = query.to_filter();
        assert_eq!(filter.customer_id, Some(customer));
        assert_eq!(filter.search.as_deref(), Some("chipper"));
        assert!(filter.low_stock_only);

        assert_eq!(InventoryQuery::default().to_filter(), InventoryFilter::default());
    }

    #[test]
    fn item_form_rejects_negative_values() {
        let form = |qty: &str, rate: &str| ItemForm {
            qty_on_hand: qty.into(),
            storage_rate: rate.into(),
            location: None,
        };
        assert!(form("-1", "25").validated().is_err());
        assert!(form("4", "-0.01").validated().is_err());
        assert!(form("four", "25").validated().is_err());

        let change = form("0", "12.50").validated().unwrap();
        assert_eq!(change.qty_on_hand, 0);
        assert_eq!(change.storage_rate, Decimal::new(1250, 2));
    }
}
