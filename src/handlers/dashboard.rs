use std::collections::BTreeMap;

use axum::{
    extract::State,
    response::Html,
};
use askama::Template;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tower_cookies::Cookies;

use crate::{
    domain::{
        filter::LOW_STOCK_THRESHOLD,
        metrics::{group_totals, monthly_flow, storage_revenue},
        MovementType,
    },
    error::AppResult,
    filters,
    middleware::{require_user, CurrentUser},
    models::MovementDisplay,
    state::AppState,
};

use super::{inventory::load_items, movements::MOVEMENT_SELECT, render};

const RECENT_MOVEMENTS: i64 = 10;

/// One row of a grouped stock summary.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    pub label: String,
    pub units: i64,
    pub charges: Decimal,
}

fn group_rows(totals: BTreeMap<String, (i64, Decimal)>) -> Vec<GroupRow> {
    totals
        .into_iter()
        .map(|(label, (units, charges))| GroupRow { label, units, charges })
        .collect()
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    current_user: CurrentUser,
    total_products: i64,
    inbound_units: i64,
    outbound_units: i64,
    monthly_revenue: Decimal,
    low_stock_items: usize,
    recent: Vec<MovementDisplay>,
    categories: Vec<GroupRow>,
}

#[derive(Template)]
#[template(path = "reports.html")]
struct ReportsTemplate {
    current_user: CurrentUser,
    customers: Vec<GroupRow>,
    total_units: i64,
    total_charges: Decimal,
    generated_at: String,
}

pub async fn dashboard(State(state): State<AppState>, cookies: Cookies) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let now = Utc::now();

    let total_products = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products")
        .fetch_one(&state.db)
        .await?;

    // A month never spans more than 31 days; monthly_flow trims the rest.
    let since = now - Duration::days(32);
    let moved = sqlx::query_as::<_, (DateTime<Utc>, String, i32)>(
        "SELECT date, movement_type, quantity FROM inventory_movements WHERE date >= $1",
    )
    .bind(since)
    .fetch_all(&state.db)
    .await?;
    let flow = monthly_flow(
        moved
            .into_iter()
            .filter_map(|(at, kind, qty)| kind.parse::<MovementType>().ok().map(|k| (at, k, qty))),
        now,
    );

    let items = load_items(&state.db).await?;
    let monthly_revenue = storage_revenue(items.iter().map(|i| (i.qty_on_hand, i.storage_rate)));
    let low_stock_items = items
        .iter()
        .filter(|i| i.qty_on_hand <= LOW_STOCK_THRESHOLD)
        .count();
    let categories = group_rows(group_totals(
        items
            .iter()
            .map(|i| (i.category.clone(), i.qty_on_hand, i.storage_rate)),
    ));

    let recent = sqlx::query_as::<_, MovementDisplay>(&format!(
        "{MOVEMENT_SELECT} ORDER BY m.date DESC LIMIT $1"
    ))
    .bind(RECENT_MOVEMENTS)
    .fetch_all(&state.db)
    .await?;

    render(&DashboardTemplate {
        current_user,
        total_products,
        inbound_units: flow.inbound,
        outbound_units: flow.outbound,
        monthly_revenue,
        low_stock_items,
        recent,
        categories,
    })
}

/// Storage charges per customer at today's quantities and rates.
pub async fn reports(State(state): State<AppState>, cookies: Cookies) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let items = load_items(&state.db).await?;

    let customers = group_rows(group_totals(
        items
            .iter()
            .map(|i| (i.customer_name.clone(), i.qty_on_hand, i.storage_rate)),
    ));
    let total_units: i64 = customers.iter().map(|r| r.units).sum();
    let total_charges: Decimal = customers.iter().map(|r| r.charges).sum();

    render(&ReportsTemplate {
        current_user,
        customers,
        total_units,
        total_charges,
        generated_at: Utc::now().format("%b %-d, %Y %H:%M UTC").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_rows_keep_label_order() {
        let totals = group_totals(vec![
            ("Excavator".to_string(), 2, Decimal::new(5000, 2)),
            ("Bucket".to_string(), 10, Decimal::new(1000, 2)),
            ("Excavator".to_string(), 1, Decimal::new(5000, 2)),
        ]);
        let rows = group_rows(totals);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, "Bucket");
        assert_eq!(rows[0].charges, Decimal::new(10000, 2));
        assert_eq!(rows[1].units, 3);
        assert_eq!(rows[1].charges, Decimal::new(15000, 2));
    }
}
