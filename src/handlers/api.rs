use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    domain::rates::current_rate,
    error::{ApiError, AppError},
    middleware::require_user,
    models::{AuditDisplay, AuditItem, Customer, InventoryItemDisplay, MovementDisplay, ProductDisplay},
    state::AppState,
};

use super::{
    audits::load_audits,
    inventory::{load_items, InventoryQuery},
    movements::{load_movements, MovementQuery},
    products::{fetch_product, search_products, ProductQuery},
    rates::rates_for,
};

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
pub struct CurrentRateResponse {
    pub product_id: Uuid,
    pub rate: Decimal,
    pub as_of: DateTime<Utc>,
}

pub async fn customers(State(state): State<AppState>, cookies: Cookies) -> ApiResult<Vec<Customer>> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let customers = sqlx::query_as::<_, Customer>("SELECT * FROM customers ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(customers))
}

pub async fn products(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<ProductQuery>,
) -> ApiResult<Vec<ProductDisplay>> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    Ok(Json(search_products(&state.db, &query).await?))
}

pub async fn inventory(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<InventoryQuery>,
) -> ApiResult<Vec<InventoryItemDisplay>> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let items = query.to_filter().apply(load_items(&state.db).await?);
    Ok(Json(items))
}

pub async fn movements(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<MovementQuery>,
) -> ApiResult<Vec<MovementDisplay>> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let filter = query.to_filter()?;
    Ok(Json(filter.apply(load_movements(&state.db).await?)))
}

pub async fn audits(State(state): State<AppState>, cookies: Cookies) -> ApiResult<Vec<AuditDisplay>> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    Ok(Json(load_audits(&state.db).await?))
}

/// Count lines recorded when an audit was completed. Empty while it is open.
pub async fn audit_items(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(audit_id): Path<Uuid>,
) -> ApiResult<Vec<AuditItem>> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM audits WHERE id = $1")
        .bind(audit_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("Audit"))?;

    let items = sqlx::query_as::<_, AuditItem>("SELECT * FROM audit_items WHERE audit_id = $1")
        .bind(audit_id)
        .fetch_all(&state.db)
        .await?;
    Ok(Json(items))
}

/// Rate a product is billed at right now.
pub async fn current_product_rate(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(product_id): Path<Uuid>,
) -> ApiResult<CurrentRateResponse> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    fetch_product(&state.db, product_id).await?;

    let as_of = Utc::now();
    let rates = rates_for(&state.db, product_id).await?;
    Ok(Json(CurrentRateResponse {
        product_id,
        rate: current_rate(&rates, product_id, as_of),
        as_of,
    }))
}

/// Fallback for unknown `/api` paths so clients get JSON, not the HTML error page.
pub async fn not_found() -> ApiError {
    ApiError(AppError::NotFound("Endpoint"))
}
