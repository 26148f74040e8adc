use std::collections::HashMap;

use axum::{
    extract::{Form, Path, Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use askama::Template;
use serde::Deserialize;
use sqlx::{Postgres, Transaction};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    domain::{plan_completion, AuditCount, AuditStatus, MovementType},
    error::{AppError, AppResult},
    middleware::{require_user, CurrentUser},
    models::{
        Audit, AuditDisplay, AuditLine, AuditResultDisplay, InventoryItem, Movement,
    },
    state::AppState,
};

use super::{blank_to_none, customer_choices, optional_uuid, parse_quantity, render, with_notice, Choice, Flash};

const TABLE: &str = "audits";

pub(crate) const AUDIT_SELECT: &str = r#"
    SELECT a.id, a.customer_id, c.name AS customer_name, a.status, a.date,
           COALESCE(NULLIF(u.full_name, ''), u.email) AS performed_by_name,
           a.notes, a.items_count, a.discrepancies_count
    FROM audits a
    LEFT JOIN customers c ON c.id = a.customer_id
    JOIN users u ON u.id = a.performed_by
"#;

#[derive(Template)]
#[template(path = "audits/list.html")]
struct AuditsTemplate {
    current_user: CurrentUser,
    audits: Vec<AuditDisplay>,
    notice: String,
}

#[derive(Template)]
#[template(path = "audits/new.html")]
struct NewAuditTemplate {
    current_user: CurrentUser,
    customers: Vec<Choice>,
}

#[derive(Template)]
#[template(path = "audits/conduct.html")]
struct ConductTemplate {
    current_user: CurrentUser,
    audit: AuditDisplay,
    lines: Vec<AuditLine>,
}

#[derive(Template)]
#[template(path = "audits/detail.html")]
struct AuditDetailTemplate {
    current_user: CurrentUser,
    audit: AuditDisplay,
    results: Vec<AuditResultDisplay>,
    notice: String,
}

#[derive(Deserialize)]
pub struct StartAuditForm {
    customer_id: Option<String>,
    notes: Option<String>,
}

pub async fn audits_list(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(flash): Query<Flash>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    render(&AuditsTemplate {
        current_user,
        audits: load_audits(&state.db).await?,
        notice: flash.notice,
    })
}

pub(crate) async fn load_audits(db: &Database) -> AppResult<Vec<AuditDisplay>> {
    Ok(
        sqlx::query_as::<_, AuditDisplay>(&format!("{AUDIT_SELECT} ORDER BY a.date DESC"))
            .fetch_all(db)
            .await?,
    )
}

pub async fn new_audit_form(State(state): State<AppState>, cookies: Cookies) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    render(&NewAuditTemplate {
        current_user,
        customers: customer_choices(&state.db, "").await?,
    })
}

pub async fn start_audit(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(form): Form<StartAuditForm>,
) -> AppResult<Redirect> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let customer_id = form.customer_id.as_deref().and_then(optional_uuid);

    let audit = sqlx::query_as::<_, Audit>(
        r#"
        INSERT INTO audits (customer_id, status, date, performed_by, notes, items_count, discrepancies_count)
        VALUES ($1, $2, NOW(), $3, $4, 0, 0)
        RETURNING *
        "#,
    )
    .bind(customer_id)
    .bind(AuditStatus::InProgress.as_str())
    .bind(current_user.id)
    .bind(blank_to_none(form.notes))
    .fetch_one(&state.db)
    .await?;

    log::info!("{} started audit {}", current_user.email, audit.id);
    state.feed.inserted(TABLE, &audit);
    Ok(Redirect::to(&format!("/audits/{}/conduct", audit.id)))
}

/// Counting sheet for an open audit. Completed audits go back to the list.
pub async fn conduct_audit(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(audit_id): Path<Uuid>,
) -> AppResult<Response> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let audit = fetch_audit_display(&state.db, audit_id).await?;
    if audit.is_completed() {
        return Ok(Redirect::to(&with_notice("/audits", "This audit has already been completed")).into_response());
    }

    let lines = sqlx::query_as::<_, AuditLine>(
        r#"
        SELECT i.id AS item_id, p.id AS product_id, p.name AS product_name, p.category, i.qty_on_hand
        FROM inventory_items i
        JOIN products p ON p.id = i.product_id
        WHERE ($1::uuid IS NULL OR p.customer_id = $1)
        ORDER BY p.name
        "#,
    )
    .bind(audit.customer_id)
    .fetch_all(&state.db)
    .await?;

    Ok(render(&ConductTemplate {
        current_user,
        audit,
        lines,
    })?
    .into_response())
}

/// Read the counting sheet: `expected_<item>`, `actual_<item>` and
/// `notes_<item>` per item. Expected is what the sheet showed; a blank count
/// confirms it. Items the sheet did not list are expected at their current
/// quantity.
fn collect_counts(items: &[InventoryItem], form: &HashMap<String, String>) -> AppResult<Vec<AuditCount>> {
    let field = |name: &str, item: &InventoryItem| {
        form.get(&format!("{name}_{}", item.id))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };

    items
        .iter()
        .map(|item| -> AppResult<AuditCount> {
            let expected = match field("expected", item) {
                None => item.qty_on_hand,
                Some(raw) => parse_quantity(raw, "Expected quantity")?,
            };
            if expected < 0 {
                return Err(AppError::validation("Expected quantity cannot be negative"));
            }
            let entered = field("actual", item)
                .map(|raw| parse_quantity(raw, "Actual count"))
                .transpose()?;
            let notes = form.get(&format!("notes_{}", item.id)).cloned();
            Ok(AuditCount::new(item.id, item.product_id, expected, entered, notes)?)
        })
        .collect()
}

/// What completing an audit changed, for the change feed.
struct Completion {
    before: Audit,
    after: Audit,
    items: Vec<(InventoryItem, InventoryItem)>,
    adjustments: Vec<Movement>,
}

/// Record the count and close the audit.
///
/// With `apply_adjustments` set, every mismatch is also written to the ledger
/// as an ADJUSTMENT and the item's quantity set to what was counted.
pub async fn complete_audit(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(audit_id): Path<Uuid>,
    Form(form): Form<HashMap<String, String>>,
) -> AppResult<Redirect> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let apply_adjustments = form.contains_key("apply_adjustments");

    let mut tx = state.db.begin().await?;
    let done = record_completion(&mut tx, audit_id, &form, apply_adjustments, current_user.id).await?;
    tx.commit().await?;

    log::info!(
        "{} completed audit {}: {} items, {} discrepancies{}",
        current_user.email,
        audit_id,
        done.after.items_count,
        done.after.discrepancies_count,
        if apply_adjustments { ", stock adjusted" } else { "" }
    );

    state.feed.updated(TABLE, &done.before, &done.after);
    for (before, after) in &done.items {
        state.feed.updated("inventory_items", before, after);
    }
    for movement in &done.adjustments {
        state.feed.inserted("inventory_movements", movement);
    }

    Ok(Redirect::to(&with_notice(
        &format!("/audits/{audit_id}"),
        "Audit completed successfully",
    )))
}

async fn record_completion(
    tx: &mut Transaction<'_, Postgres>,
    audit_id: Uuid,
    form: &HashMap<String, String>,
    apply_adjustments: bool,
    user_id: Uuid,
) -> AppResult<Completion> {
    let before = sqlx::query_as::<_, Audit>("SELECT * FROM audits WHERE id = $1 FOR UPDATE")
        .bind(audit_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::NotFound("Audit"))?;
    let completed = before.status.parse::<AuditStatus>()?.complete()?;

    let items = sqlx::query_as::<_, InventoryItem>(
        r#"
        SELECT i.*
        FROM inventory_items i
        JOIN products p ON p.id = i.product_id
        WHERE ($1::uuid IS NULL OR p.customer_id = $1)
        ORDER BY p.name
        FOR UPDATE OF i
        "#,
    )
    .bind(before.customer_id)
    .fetch_all(&mut **tx)
    .await?;

    let counts = collect_counts(&items, form)?;
    let lines: Vec<(AuditCount, i32)> = counts
        .into_iter()
        .zip(items.iter().map(|item| item.qty_on_hand))
        .collect();
    let plan = plan_completion(&lines, apply_adjustments)?;

    for (count, _) in &lines {
        sqlx::query(
            r#"
            INSERT INTO audit_items (audit_id, product_id, expected_qty, actual_qty, notes)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(audit_id)
        .bind(count.product_id)
        .bind(count.expected_qty)
        .bind(count.actual_qty)
        .bind(&count.notes)
        .execute(&mut **tx)
        .await?;
    }

    let mut adjustments = Vec::with_capacity(plan.adjustments.len());
    for adjustment in &plan.adjustments {
        let notes = lines
            .iter()
            .find(|(count, _)| count.item_id == adjustment.item_id)
            .and_then(|(count, _)| count.notes.clone());
        let movement = sqlx::query_as::<_, Movement>(
            r#"
            INSERT INTO inventory_movements
                (inventory_item_id, movement_type, quantity, reference_number, notes, date, created_by)
            VALUES ($1, $2, $3, $4, $5, NOW(), $6)
            RETURNING *
            "#,
        )
        .bind(adjustment.item_id)
        .bind(MovementType::Adjustment.as_str())
        .bind(adjustment.quantity)
        .bind(format!("AUDIT-{}", short_id(audit_id)))
        .bind(notes)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;
        adjustments.push(movement);
    }

    let corrected: HashMap<Uuid, i32> = plan
        .adjustments
        .iter()
        .map(|adjustment| (adjustment.item_id, adjustment.qty_on_hand))
        .collect();

    let mut changed = Vec::with_capacity(items.len());
    for item in items {
        let qty_on_hand = corrected.get(&item.id).copied().unwrap_or(item.qty_on_hand);
        let after = sqlx::query_as::<_, InventoryItem>(
            r#"
            UPDATE inventory_items
            SET qty_on_hand = $1, last_audit_date = NOW(), updated_at = NOW()
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(qty_on_hand)
        .bind(item.id)
        .fetch_one(&mut **tx)
        .await?;
        changed.push((item, after));
    }

    let after = sqlx::query_as::<_, Audit>(
        r#"
        UPDATE audits
        SET status = $1, items_count = $2, discrepancies_count = $3, updated_at = NOW()
        WHERE id = $4 AND status = $5
        RETURNING *
        "#,
    )
    .bind(completed.as_str())
    .bind(plan.summary.items_count)
    .bind(plan.summary.discrepancies_count)
    .bind(audit_id)
    .bind(AuditStatus::InProgress.as_str())
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AppError::AuditClosed)?;

    Ok(Completion {
        before,
        after,
        items: changed,
        adjustments,
    })
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_uppercase()
}

pub async fn audit_detail(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(audit_id): Path<Uuid>,
    Query(flash): Query<Flash>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let audit = fetch_audit_display(&state.db, audit_id).await?;

    let results = sqlx::query_as::<_, AuditResultDisplay>(
        r#"
        SELECT ai.product_id, p.name AS product_name, ai.expected_qty, ai.actual_qty, ai.notes
        FROM audit_items ai
        JOIN products p ON p.id = ai.product_id
        WHERE ai.audit_id = $1
        ORDER BY p.name
        "#,
    )
    .bind(audit_id)
    .fetch_all(&state.db)
    .await?;

    render(&AuditDetailTemplate {
        current_user,
        audit,
        results,
        notice: flash.notice,
    })
}

async fn fetch_audit_display(db: &Database, audit_id: Uuid) -> AppResult<AuditDisplay> {
    sqlx::query_as::<_, AuditDisplay>(&format!("{AUDIT_SELECT} WHERE a.id = $1"))
        .bind(audit_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("Audit"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuditSummary;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn item(qty_on_hand: i32) -> InventoryItem {
        InventoryItem {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            location: None,
            qty_on_hand,
            qty_allocated: 0,
            qty_received: qty_on_hand,
            date_received: None,
            qty_shipped: 0,
            date_shipped: None,
            storage_rate: Decimal::new(2500, 2),
            last_audit_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn blank_counts_confirm_recorded_quantity() {
        let items = vec![item(12), item(4)];
        let mut form = HashMap::new();
        form.insert(format!("actual_{}", items[0].id), "".to_string());
        form.insert(format!("actual_{}", items[1].id), "7".to_string());
        form.insert(format!("notes_{}", items[1].id), "found a pallet".to_string());

        let counts = collect_counts(&items, &form).unwrap();
        assert_eq!(counts[0].actual_qty, 12);
        assert_eq!(counts[0].discrepancy(), 0);
        assert_eq!(counts[1].discrepancy(), 3);
        assert_eq!(counts[1].notes.as_deref(), Some("found a pallet"));

        let summary = AuditSummary::from_counts(&counts);
        assert_eq!(summary.items_count, 2);
        assert_eq!(summary.discrepancies_count, 1);
    }

    #[test]
    fn counts_are_measured_against_what_the_sheet_showed() {
        // The sheet showed 10 and the operator counted 10; 3 shipped since.
        let items = vec![item(7)];
        let mut form = HashMap::new();
        form.insert(format!("expected_{}", items[0].id), "10".to_string());
        form.insert(format!("actual_{}", items[0].id), "10".to_string());

        let counts = collect_counts(&items, &form).unwrap();
        assert_eq!(counts[0].expected_qty, 10);
        assert_eq!(counts[0].discrepancy(), 0);

        let lines: Vec<(AuditCount, i32)> = counts.into_iter().zip([7]).collect();
        let plan = plan_completion(&lines, true).unwrap();
        assert!(plan.adjustments.is_empty());
        assert_eq!(plan.summary.discrepancies_count, 0);
    }

    #[test]
    fn blank_count_confirms_what_the_sheet_showed() {
        let items = vec![item(7)];
        let mut form = HashMap::new();
        form.insert(format!("expected_{}", items[0].id), "10".to_string());
        form.insert(format!("actual_{}", items[0].id), " ".to_string());

        let counts = collect_counts(&items, &form).unwrap();
        assert_eq!(counts[0].actual_qty, 10);
        assert_eq!(counts[0].discrepancy(), 0);
    }

    #[test]
    fn items_missing_from_the_sheet_expect_current_stock() {
        let items = vec![item(5)];
        let counts = collect_counts(&items, &HashMap::new()).unwrap();
        assert_eq!(counts[0].expected_qty, 5);
        assert_eq!(counts[0].actual_qty, 5);

        let mut form = HashMap::new();
        form.insert(format!("expected_{}", items[0].id), "-2".to_string());
        assert!(collect_counts(&items, &form).is_err());
    }

    #[test]
    fn negative_and_garbage_counts_are_rejected() {
        let items = vec![item(3)];
        let mut form = HashMap::new();
        form.insert(format!("actual_{}", items[0].id), "-1".to_string());
        assert!(collect_counts(&items, &form).is_err());

        form.insert(format!("actual_{}", items[0].id), "lots".to_string());
        assert!(collect_counts(&items, &form).is_err());
    }

    #[test]
    fn adjustment_reference_uses_short_audit_id() {
        let id = Uuid::parse_str("3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap();
        assert_eq!(short_id(id), "3F2504E0");
    }
}
