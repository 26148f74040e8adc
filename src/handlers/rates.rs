use axum::{
    extract::{Form, Path, Query, State},
    response::{Html, Redirect},
};
use askama::Template;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    domain::rates::validate_window,
    error::{AppError, AppResult},
    middleware::{require_user, CurrentUser},
    filters,
    models::{StorageRate, StorageRateDisplay},
    state::AppState,
};

use super::{
    date_to_utc, optional_date, optional_uuid, parse_decimal, product_choices, render, with_notice,
    Choice, Flash,
};

const TABLE: &str = "storage_rates";

pub(crate) const RATE_SELECT: &str = r#"
    SELECT r.id, r.product_id, p.name AS product_name, r.rate, r.effective_date, r.end_date
    FROM storage_rates r
    JOIN products p ON p.id = r.product_id
"#;

#[derive(Template)]
#[template(path = "rates/list.html")]
struct RatesTemplate {
    current_user: CurrentUser,
    rates: Vec<StorageRateDisplay>,
    notice: String,
}

#[derive(Template)]
#[template(path = "rates/form.html")]
struct RateFormTemplate {
    current_user: CurrentUser,
    action: String,
    is_new: bool,
    products: Vec<Choice>,
    rate: String,
    effective_date: String,
    end_date: String,
}

#[derive(Deserialize)]
pub struct RateForm {
    product_id: String,
    rate: String,
    effective_date: String,
    end_date: Option<String>,
}

#[derive(Debug)]
struct RateInput {
    product_id: Uuid,
    rate: Decimal,
    effective_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
}

impl RateForm {
    fn validated(self) -> AppResult<RateInput> {
        let product_id =
            optional_uuid(&self.product_id).ok_or_else(|| AppError::validation("Choose a product"))?;
        let rate = parse_decimal(&self.rate, "Rate")?;
        let effective_date = optional_date(Some(self.effective_date.as_str()))?
            .map(date_to_utc)
            .ok_or_else(|| AppError::validation("Effective date is required"))?;
        let end_date = optional_date(self.end_date.as_deref())?.map(date_to_utc);

        validate_window(rate, effective_date, end_date).map_err(AppError::validation)?;
        Ok(RateInput {
            product_id,
            rate,
            effective_date,
            end_date,
        })
    }
}

pub async fn rates_list(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(flash): Query<Flash>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let rates = sqlx::query_as::<_, StorageRateDisplay>(&format!(
        "{RATE_SELECT} ORDER BY p.name, r.effective_date DESC"
    ))
    .fetch_all(&state.db)
    .await?;

    render(&RatesTemplate {
        current_user,
        rates,
        notice: flash.notice,
    })
}

pub async fn rate_form(State(state): State<AppState>, cookies: Cookies) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    render(&RateFormTemplate {
        current_user,
        action: "/rates".to_string(),
        is_new: true,
        products: product_choices(&state.db, "").await?,
        rate: String::new(),
        effective_date: Utc::now().format("%Y-%m-%d").to_string(),
        end_date: String::new(),
    })
}

pub async fn create_rate(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(form): Form<RateForm>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let input = form.validated()?;

    let rate = sqlx::query_as::<_, StorageRate>(
        r#"
        INSERT INTO storage_rates (product_id, rate, effective_date, end_date)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(input.product_id)
    .bind(input.rate)
    .bind(input.effective_date)
    .bind(input.end_date)
    .fetch_one(&state.db)
    .await?;

    state.feed.inserted(TABLE, &rate);
    Ok(Redirect::to(&with_notice("/rates", "Storage rate added")))
}

pub async fn rate_edit_form(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(rate_id): Path<Uuid>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let rate = sqlx::query_as::<_, StorageRateDisplay>(&format!("{RATE_SELECT} WHERE r.id = $1"))
        .bind(rate_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("Storage rate"))?;

    render(&RateFormTemplate {
        current_user,
        action: format!("/rates/{rate_id}"),
        is_new: false,
        products: product_choices(&state.db, &rate.product_id.to_string()).await?,
        rate: rate.rate.to_string(),
        effective_date: rate.effective(),
        end_date: rate.end_date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
    })
}

pub async fn update_rate(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(rate_id): Path<Uuid>,
    Form(form): Form<RateForm>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let input = form.validated()?;
    let before = fetch_rate(&state.db, rate_id).await?;

    let after = sqlx::query_as::<_, StorageRate>(
        r#"
        UPDATE storage_rates
        SET product_id = $1, rate = $2, effective_date = $3, end_date = $4, updated_at = NOW()
        WHERE id = $5
        RETURNING *
        "#,
    )
    .bind(input.product_id)
    .bind(input.rate)
    .bind(input.effective_date)
    .bind(input.end_date)
    .bind(rate_id)
    .fetch_one(&state.db)
    .await?;

    state.feed.updated(TABLE, &before, &after);
    Ok(Redirect::to(&with_notice("/rates", "Storage rate updated")))
}

pub async fn delete_rate(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(rate_id): Path<Uuid>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let rate = fetch_rate(&state.db, rate_id).await?;

    sqlx::query("DELETE FROM storage_rates WHERE id = $1")
        .bind(rate_id)
        .execute(&state.db)
        .await?;

    state.feed.deleted(TABLE, &rate);
    Ok(Redirect::to(&with_notice("/rates", "Storage rate removed")))
}

pub(crate) async fn rates_for(db: &Database, product_id: Uuid) -> AppResult<Vec<StorageRate>> {
    Ok(
        sqlx::query_as::<_, StorageRate>("SELECT * FROM storage_rates WHERE product_id = $1")
            .bind(product_id)
            .fetch_all(db)
            .await?,
    )
}

async fn fetch_rate(db: &Database, rate_id: Uuid) -> AppResult<StorageRate> {
    sqlx::query_as::<_, StorageRate>("SELECT * FROM storage_rates WHERE id = $1")
        .bind(rate_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("Storage rate"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(rate: &str, from: &str, until: Option<&str>) -> RateForm {
        RateForm {
            product_id: Uuid::new_v4().to_string(),
            rate: rate.into(),
            effective_date: from.into(),
            end_date: until.map(str::to_string),
        }
    }

    #[test]
    fn open_ended_window_is_accepted() {
        let input = form("30.00", "2024-01-01", Some("")).validated().unwrap();
        assert_eq!(input.rate, Decimal::new(3000, 2));
        assert_eq!(input.end_date, None);
    }

    #[test]
    fn window_must_end_after_it_starts() {
        let err = form("30", "2024-02-01", Some("2024-01-01")).validated().unwrap_err();
        assert_eq!(err.to_string(), "End date must be after the effective date");
        assert!(form("-1", "2024-01-01", None).validated().is_err());
        assert!(form("30", "", None).validated().is_err());
    }
}
