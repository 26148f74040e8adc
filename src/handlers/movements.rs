use std::collections::{BTreeMap, BTreeSet, HashMap};

use axum::{
    extract::{Form, Path, Query, State},
    response::{Html, Redirect},
};
use axum_extra::extract::Multipart;
use askama::Template;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{types::Json, Postgres, Transaction};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    domain::{
        posting::{stage_posting, MAX_LINE_QUANTITY},
        rates::current_rate,
        shipping::Carrier,
        MovementFilter, MovementType, ShippingNotes, StagedLine, StockCounters,
    },
    error::{AppError, AppResult},
    middleware::{require_user, CurrentUser},
    models::{
        Attachment, InventoryItem, Movement, MovementDisplay, StorageRate,
    },
    realtime::ChangeFeed,
    state::AppState,
    storage::{self, BlobStore, Bucket},
};

use super::{
    blank_to_none, choices, customer_choices, date_to_utc, optional_date, optional_uuid,
    parse_quantity, product_choices, render, with_notice, Choice, Flash, MultipartForm,
};

const TABLE: &str = "inventory_movements";
const ITEMS_TABLE: &str = "inventory_items";

/// Movements with the product and customer they belong to. Outer joins keep
/// movements whose product has gone missing.
pub(crate) const MOVEMENT_SELECT: &str = r#"
    SELECT m.id, m.inventory_item_id, m.movement_type, m.quantity, m.reference_number,
           m.notes, m.attachments, m.date,
           p.id AS product_id, p.name AS product_name,
           c.id AS customer_id, c.name AS customer_name
    FROM inventory_movements m
    LEFT JOIN inventory_items i ON i.id = m.inventory_item_id
    LEFT JOIN products p ON p.id = i.product_id
    LEFT JOIN customers c ON c.id = p.customer_id
"#;

#[derive(Template)]
#[template(path = "movements/list.html")]
struct MovementsTemplate {
    current_user: CurrentUser,
    movements: Vec<MovementDisplay>,
    customers: Vec<Choice>,
    products: Vec<Choice>,
    types: Vec<Choice>,
    query: MovementQuery,
    filtered: bool,
    inbound_units: i64,
    outbound_units: i64,
    notice: String,
}

#[derive(Template)]
#[template(path = "movements/form.html")]
struct MovementFormTemplate {
    current_user: CurrentUser,
    movement_type: String,
    products: Vec<Choice>,
    carriers: Vec<Choice>,
    today: String,
}

#[derive(Template)]
#[template(path = "movements/detail.html")]
struct MovementDetailTemplate {
    current_user: CurrentUser,
    movement: MovementDisplay,
    item: Option<InventoryItem>,
    notice: String,
}

#[derive(Template)]
#[template(path = "movements/edit.html")]
struct MovementEditTemplate {
    current_user: CurrentUser,
    movement: MovementDisplay,
    carriers: Vec<Choice>,
    tracking: String,
    remarks: String,
    date: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MovementQuery {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub movement_type: String,
}

impl MovementQuery {
    pub fn to_filter(&self) -> AppResult<MovementFilter> {
        let kind = match self.movement_type.trim() {
            "" | "all" => None,
            raw => Some(raw.parse::<MovementType>()?),
        };
        Ok(MovementFilter {
            from: optional_date(Some(self.from.as_str()))?,
            to: optional_date(Some(self.to.as_str()))?,
            customer_id: optional_uuid(&self.customer_id),
            product_id: optional_uuid(&self.product_id),
            kind,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NewMovementQuery {
    #[serde(default, rename = "type")]
    kind: String,
}

/// One product line of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PostingLine {
    product_id: Uuid,
    quantity: i32,
}

/// Pair up the repeated `product_id` / `quantity` inputs. Rows left with no
/// product selected are ignored.
fn posting_lines(product_ids: &[String], quantities: &[String]) -> AppResult<Vec<PostingLine>> {
    let mut lines = Vec::new();
    for (index, raw_product) in product_ids.iter().enumerate() {
        let Some(product_id) = optional_uuid(raw_product) else {
            continue;
        };
        let raw_quantity = quantities.get(index).map(String::as_str).unwrap_or_default();
        let quantity = parse_quantity(raw_quantity, "Quantity")?;
        if quantity < 1 {
            return Err(AppError::validation("Quantity must be at least 1"));
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(AppError::validation(format!(
                "Quantity cannot exceed {MAX_LINE_QUANTITY} units per line"
            )));
        }
        lines.push(PostingLine { product_id, quantity });
    }
    if lines.is_empty() {
        return Err(AppError::validation("Add at least one product to the movement"));
    }
    Ok(lines)
}

/// Carrier options; a carrier typed in by hand on an older movement stays
/// selectable.
fn carrier_choices(selected: &str) -> Vec<Choice> {
    let mut options = choices(Carrier::labels().into_iter().map(|l| (l, l)), selected);
    if !selected.is_empty() && !options.iter().any(|c| c.selected) {
        options.push(Choice {
            value: selected.to_string(),
            label: selected.to_string(),
            selected: true,
        });
    }
    options
}

fn shipping_notes(carrier: Option<String>, tracking: Option<String>, remarks: Option<String>) -> Option<String> {
    let notes = ShippingNotes::new(
        carrier.as_deref().unwrap_or_default(),
        tracking.as_deref().unwrap_or_default(),
        remarks.as_deref(),
    );
    (!notes.is_empty()).then(|| notes.encode())
}

pub async fn movements_list(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<MovementQuery>,
    Query(flash): Query<Flash>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let filter = query.to_filter()?;
    let movements = filter.apply(load_movements(&state.db).await?);

    let units = |kind: MovementType| -> i64 {
        movements
            .iter()
            .filter(|m| m.movement_type == kind.as_str())
            .map(|m| i64::from(m.quantity))
            .sum()
    };
    let inbound_units = units(MovementType::Inbound);
    let outbound_units = units(MovementType::Outbound);

    render(&MovementsTemplate {
        current_user,
        filtered: filter.is_active(),
        inbound_units,
        outbound_units,
        movements,
        customers: customer_choices(&state.db, &query.customer_id).await?,
        products: product_choices(&state.db, &query.product_id).await?,
        types: choices(
            [MovementType::Inbound, MovementType::Outbound, MovementType::Adjustment]
                .map(|k| (k.as_str(), k.as_str())),
            &query.movement_type.to_ascii_uppercase(),
        ),
        query,
        notice: flash.notice,
    })
}

pub(crate) async fn load_movements(db: &Database) -> AppResult<Vec<MovementDisplay>> {
    Ok(
        sqlx::query_as::<_, MovementDisplay>(&format!("{MOVEMENT_SELECT} ORDER BY m.date DESC"))
            .fetch_all(db)
            .await?,
    )
}

pub async fn movement_form(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<NewMovementQuery>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let movement_type = match query.kind.parse::<MovementType>() {
        Ok(MovementType::Outbound) => MovementType::Outbound,
        _ => MovementType::Inbound,
    };

    render(&MovementFormTemplate {
        current_user,
        movement_type: movement_type.as_str().to_string(),
        products: product_choices(&state.db, "").await?,
        carriers: carrier_choices(""),
        today: Utc::now().format("%Y-%m-%d").to_string(),
    })
}

/// Post a movement of one or more product lines.
///
/// All lines commit together or not at all. Attachments are stored first and
/// removed again when the posting is rejected.
pub async fn create_movement(
    State(state): State<AppState>,
    cookies: Cookies,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let form = MultipartForm::read(multipart).await?;

    let kind = form
        .text("movement_type")
        .ok_or_else(|| AppError::validation("Choose a movement type"))?
        .parse::<MovementType>()?;
    if kind == MovementType::Adjustment {
        return Err(AppError::validation("Adjustments are only written by audits"));
    }
    let lines = posting_lines(form.all("product_id"), form.all("quantity"))?;
    let posting = NewPosting {
        kind,
        reference_number: form.text("reference_number"),
        notes: shipping_notes(form.text("carrier"), form.text("tracking_number"), form.text("notes")),
        date: optional_date(form.text("date").as_deref())?
            .map(date_to_utc)
            .unwrap_or_else(Utc::now),
        created_by: current_user.id,
    };

    let posting_id = Uuid::new_v4();
    let attachments = store_attachments(&state.blobs, posting_id, &form).await?;

    let posted = match post_lines(&state.db, &posting, &lines, &attachments).await {
        Ok(posted) => posted,
        Err(e) => {
            discard_attachments(&state.blobs, &attachments).await;
            return Err(e);
        }
    };

    log::info!(
        "{} posted {} {} line(s)",
        current_user.email,
        posted.len(),
        kind
    );
    publish_posted(&state.feed, &posted);

    Ok(Redirect::to(&with_notice(
        "/movements",
        &format!("{} movement(s) recorded", posted.len()),
    )))
}

/// Fields shared by every line of one posting.
struct NewPosting {
    kind: MovementType,
    reference_number: Option<String>,
    notes: Option<String>,
    date: DateTime<Utc>,
    created_by: Uuid,
}

/// What one line changed, for the change feed.
struct PostedLine {
    movement: Movement,
    before: Option<InventoryItem>,
    after: InventoryItem,
}

/// A product touched by a posting, with its item as last written.
struct TrackedProduct {
    name: String,
    item: Option<InventoryItem>,
}

async fn post_lines(
    db: &Database,
    posting: &NewPosting,
    lines: &[PostingLine],
    attachments: &[Attachment],
) -> AppResult<Vec<PostedLine>> {
    let mut tx = db.begin().await?;

    // Lock in product order so two postings never wait on each other.
    let mut tracked = BTreeMap::new();
    for product_id in lines.iter().map(|l| l.product_id).collect::<BTreeSet<_>>() {
        let name = sqlx::query_scalar::<_, String>("SELECT name FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("Product"))?;
        let item = lock_item(&mut tx, product_id).await?;
        tracked.insert(product_id, TrackedProduct { name, item });
    }

    let stock: HashMap<Uuid, Option<StockCounters>> = tracked
        .iter()
        .map(|(id, product)| (*id, product.item.as_ref().map(InventoryItem::counters)))
        .collect();
    let batch: Vec<(Uuid, i32)> = lines.iter().map(|l| (l.product_id, l.quantity)).collect();
    let staged = stage_posting(posting.kind, &batch, &stock, posting.date).map_err(|(product_id, e)| {
        let name = tracked
            .get(&product_id)
            .map_or("selected product", |product| product.name.as_str());
        AppError::from_posting(e, name)
    })?;

    let mut posted = Vec::with_capacity(staged.len());
    for line in &staged {
        let product = tracked
            .get_mut(&line.product_id)
            .ok_or(AppError::NotFound("Product"))?;
        posted.push(post_line(&mut tx, posting, line, product, attachments).await?);
    }

    tx.commit().await?;
    Ok(posted)
}

/// Write one staged line: the movement row, then the item's counters as
/// staged. The counter update only applies to the quantity it was staged
/// from.
async fn post_line(
    tx: &mut Transaction<'_, Postgres>,
    posting: &NewPosting,
    line: &StagedLine,
    product: &mut TrackedProduct,
    attachments: &[Attachment],
) -> AppResult<PostedLine> {
    let (before, item) = if line.creates_item {
        (None, create_item(tx, line.product_id).await?)
    } else {
        let item = product
            .item
            .clone()
            .ok_or(AppError::NotFound("Inventory item"))?;
        (Some(item.clone()), item)
    };

    let movement = sqlx::query_as::<_, Movement>(
        r#"
        INSERT INTO inventory_movements
            (inventory_item_id, movement_type, quantity, reference_number, notes, attachments, date, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(item.id)
    .bind(posting.kind.as_str())
    .bind(line.quantity)
    .bind(&posting.reference_number)
    .bind(&posting.notes)
    .bind(Json(attachments.to_vec()))
    .bind(posting.date)
    .bind(posting.created_by)
    .fetch_one(&mut **tx)
    .await?;

    let after = sqlx::query_as::<_, InventoryItem>(
        r#"
        UPDATE inventory_items
        SET qty_on_hand = $1, qty_received = $2, qty_shipped = $3,
            date_received = $4, date_shipped = $5, updated_at = NOW()
        WHERE id = $6 AND qty_on_hand = $7
        RETURNING *
        "#,
    )
    .bind(line.after.qty_on_hand)
    .bind(line.after.qty_received)
    .bind(line.after.qty_shipped)
    .bind(line.after.date_received)
    .bind(line.after.date_shipped)
    .bind(item.id)
    .bind(line.before.qty_on_hand)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::StockChanged {
        product: product.name.clone(),
    })?;

    product.item = Some(after.clone());
    Ok(PostedLine {
        movement,
        before,
        after,
    })
}

async fn lock_item(tx: &mut Transaction<'_, Postgres>, product_id: Uuid) -> AppResult<Option<InventoryItem>> {
    Ok(sqlx::query_as::<_, InventoryItem>(
        "SELECT * FROM inventory_items WHERE product_id = $1 FOR UPDATE",
    )
    .bind(product_id)
    .fetch_optional(&mut **tx)
    .await?)
}

/// Start tracking a product at zero, priced at its current storage rate. A
/// concurrent posting may have created the item first; either way the locked
/// row is returned.
async fn create_item(tx: &mut Transaction<'_, Postgres>, product_id: Uuid) -> AppResult<InventoryItem> {
    let rates = sqlx::query_as::<_, StorageRate>("SELECT * FROM storage_rates WHERE product_id = $1")
        .bind(product_id)
        .fetch_all(&mut **tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO inventory_items (product_id, qty_on_hand, qty_allocated, qty_received, qty_shipped, storage_rate)
        VALUES ($1, 0, 0, 0, 0, $2)
        ON CONFLICT (product_id) DO NOTHING
        "#,
    )
    .bind(product_id)
    .bind(current_rate(&rates, product_id, Utc::now()))
    .execute(&mut **tx)
    .await?;

    lock_item(tx, product_id)
        .await?
        .ok_or(AppError::NotFound("Inventory item"))
}

async fn store_attachments(
    blobs: &BlobStore,
    posting_id: Uuid,
    form: &MultipartForm,
) -> AppResult<Vec<Attachment>> {
    // Validate everything before writing anything.
    let mut accepted = Vec::new();
    for file in form.files_named("attachments") {
        let extension = storage::image_extension(&file.file_name)?;
        storage::check_size(&file.file_name, file.data.len())?;
        accepted.push((file, extension));
    }

    let mut attachments = Vec::with_capacity(accepted.len());
    for (file, extension) in accepted {
        let id = Uuid::new_v4();
        let stored = blobs
            .upload(
                Bucket::MovementAttachments,
                &format!("{posting_id}/{id}.{extension}"),
                &file.data,
            )
            .await;
        let url = match stored {
            Ok(url) => url,
            Err(e) => {
                discard_attachments(blobs, &attachments).await;
                return Err(e.into());
            }
        };
        attachments.push(Attachment {
            id,
            name: file.file_name.clone(),
            kind: storage::content_type_for(&extension).to_string(),
            size: i64::try_from(file.data.len()).unwrap_or(i64::MAX),
            url,
            upload_date: Utc::now(),
        });
    }
    Ok(attachments)
}

async fn discard_attachments(blobs: &BlobStore, attachments: &[Attachment]) {
    for attachment in attachments {
        let Some(path) = blobs.path_from_url(Bucket::MovementAttachments, &attachment.url) else {
            continue;
        };
        if let Err(e) = blobs.remove(Bucket::MovementAttachments, path).await {
            log::warn!("could not remove attachment {}: {e}", attachment.url);
        }
    }
}

fn publish_posted(feed: &ChangeFeed, posted: &[PostedLine]) {
    for line in posted {
        feed.inserted(TABLE, &line.movement);
        match &line.before {
            Some(before) => feed.updated(ITEMS_TABLE, before, &line.after),
            None => feed.inserted(ITEMS_TABLE, &line.after),
        }
    }
}

pub async fn movement_detail(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(movement_id): Path<Uuid>,
    Query(flash): Query<Flash>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let movement = fetch_movement_display(&state.db, movement_id).await?;

    let item = sqlx::query_as::<_, InventoryItem>("SELECT * FROM inventory_items WHERE id = $1")
        .bind(movement.inventory_item_id)
        .fetch_optional(&state.db)
        .await?;

    render(&MovementDetailTemplate {
        current_user,
        movement,
        item,
        notice: flash.notice,
    })
}

pub async fn movement_edit_form(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(movement_id): Path<Uuid>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let movement = fetch_movement_display(&state.db, movement_id).await?;
    let shipping = movement.shipping();

    render(&MovementEditTemplate {
        current_user,
        carriers: carrier_choices(shipping.carrier.as_deref().unwrap_or_default()),
        tracking: shipping.tracking.unwrap_or_default(),
        remarks: shipping.remarks.unwrap_or_default(),
        date: movement.date.format("%Y-%m-%d").to_string(),
        movement,
    })
}

#[derive(Deserialize)]
pub struct MovementEditForm {
    reference_number: Option<String>,
    carrier: Option<String>,
    tracking_number: Option<String>,
    notes: Option<String>,
    date: String,
}

/// Correct a posted movement's paperwork. Type and quantity stay as posted.
pub async fn update_movement(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(movement_id): Path<Uuid>,
    Form(form): Form<MovementEditForm>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let before = sqlx::query_as::<_, Movement>("SELECT * FROM inventory_movements WHERE id = $1")
        .bind(movement_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("Movement"))?;

    let date = optional_date(Some(form.date.as_str()))?
        .map(date_to_utc)
        .unwrap_or(before.date);
    let notes = shipping_notes(
        blank_to_none(form.carrier),
        blank_to_none(form.tracking_number),
        blank_to_none(form.notes),
    );

    let after = sqlx::query_as::<_, Movement>(
        r#"
        UPDATE inventory_movements
        SET reference_number = $1, notes = $2, date = $3, updated_at = NOW()
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(blank_to_none(form.reference_number))
    .bind(notes)
    .bind(date)
    .bind(movement_id)
    .fetch_one(&state.db)
    .await?;

    state.feed.updated(TABLE, &before, &after);
    Ok(Redirect::to(&with_notice(
        &format!("/movements/{movement_id}"),
        "Movement updated",
    )))
}

async fn fetch_movement_display(db: &Database, movement_id: Uuid) -> AppResult<MovementDisplay> {
    sqlx::query_as::<_, MovementDisplay>(&format!("{MOVEMENT_SELECT} WHERE m.id = $1"))
        .bind(movement_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("Movement"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_pair_products_with_quantities() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let lines = posting_lines(
            &[a.to_string(), String::new(), b.to_string()],
            &["5".into(), "".into(), " 2 ".into()],
        )
        .unwrap();
        assert_eq!(
            lines,
            vec![
                PostingLine { product_id: a, quantity: 5 },
                PostingLine { product_id: b, quantity: 2 },
            ]
        );
    }

    #[test]
    fn lines_need_positive_quantities() {
        let id = Uuid::new_v4().to_string();
        assert!(posting_lines(&[id.clone()], &["0".into()]).is_err());
        assert!(posting_lines(&[id.clone()], &[]).is_err());
        assert!(posting_lines(&[id], &["-4".into()]).is_err());
    }

    #[test]
    fn line_quantities_are_capped() {
        let id = Uuid::new_v4().to_string();
        let err = posting_lines(&[id.clone()], &["2147483647".into()]).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Quantity cannot exceed 1000000 units per line");

        let lines = posting_lines(&[id], &[MAX_LINE_QUANTITY.to_string()]).unwrap();
        assert_eq!(lines[0].quantity, MAX_LINE_QUANTITY);
    }

    #[test]
    fn a_posting_needs_at_least_one_product() {
        let err = posting_lines(&["".into()], &["3".into()]).unwrap_err();
        assert_eq!(err.to_string(), "Add at least one product to the movement");
    }

    #[test]
    fn carrier_and_tracking_are_packed_into_notes() {
        assert_eq!(
            shipping_notes(Some("FedEx".into()), Some("1Z999".into()), Some("fragile".into())),
            Some("FedEx - 1Z999\nfragile".to_string())
        );
        assert_eq!(shipping_notes(None, None, None), None);
    }

    #[test]
    fn hand_typed_carriers_stay_selectable() {
        let options = carrier_choices("Acme Freight");
        assert_eq!(options.len(), Carrier::labels().len() + 1);
        assert!(options.last().unwrap().selected);

        let options = carrier_choices("UPS");
        assert_eq!(options.iter().filter(|c| c.selected).count(), 1);
    }

    #[test]
    fn query_parses_into_filter() {
        let product = Uuid::new_v4();
        let query = MovementQuery {
            from: "2024-03-01".into(),
            to: "".into(),
            customer_id: "all".into(),
            product_id: product.to_string(),
            movement_type: "outbound".into(),
        };
        let filter = query.to_filter().unwrap();
        assert_eq!(filter.from, chrono::NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(filter.to, None);
        assert_eq!(filter.customer_id, None);
        assert_eq!(filter.product_id, Some(product));
        assert_eq!(filter.kind, Some(MovementType::Outbound));

        let bad = MovementQuery {
            movement_type: "sideways".into(),
            ..Default::default()
        };
        assert!(bad.to_filter().is_err());
    }
}
