use axum::{
    extract::{Form, Path, Query, State},
    response::{Html, Redirect},
};
use axum_extra::extract::Multipart;
use askama::Template;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::types::Json;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    domain::rates::current_rate,
    error::{AppError, AppResult},
    filters,
    middleware::{require_user, CurrentUser},
    models::{
        product::mark_primary, InventoryItem, MovementDisplay, Product,
        ProductCategory, ProductDisplay, ProductImage, StorageRateDisplay,
    },
    state::AppState,
    storage::{self, Bucket},
};

use super::{
    blank_to_none, choices, customer_choices, movements::MOVEMENT_SELECT, optional_uuid,
    parse_decimal, rates::{rates_for, RATE_SELECT}, render, with_notice, Choice, Flash,
    MultipartForm,
};

const TABLE: &str = "products";

/// Product rows as templates and the JSON API see them.
pub(crate) const PRODUCT_SELECT: &str = r#"
    SELECT p.id, p.name, p.sku, p.category, p.customer_id, c.name AS customer_name,
           COALESCE(p.description, '') AS description,
           COALESCE(p.dimensions, '') AS dimensions,
           COALESCE(p.weight::text, '') AS weight,
           p.active,
           COALESCE(i.qty_on_hand, 0) AS qty_on_hand
    FROM products p
    JOIN customers c ON c.id = p.customer_id
    LEFT JOIN inventory_items i ON i.product_id = p.id
"#;

#[derive(Template)]
#[template(path = "products/list.html")]
struct ProductsTemplate {
    current_user: CurrentUser,
    products: Vec<ProductDisplay>,
    customers: Vec<Choice>,
    categories: Vec<Choice>,
    query: ProductQuery,
    notice: String,
}

#[derive(Template)]
#[template(path = "products/form.html")]
struct ProductFormTemplate {
    current_user: CurrentUser,
    product: ProductDisplay,
    is_new: bool,
    customers: Vec<Choice>,
    categories: Vec<Choice>,
}

#[derive(Template)]
#[template(path = "products/detail.html")]
struct ProductDetailTemplate {
    current_user: CurrentUser,
    product: ProductDisplay,
    images: Vec<ProductImage>,
    stock: Option<InventoryItem>,
    movements: Vec<MovementDisplay>,
    rates: Vec<StorageRateDisplay>,
    current_rate: Decimal,
    notice: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub customer_id: String,
}

impl ProductQuery {
    fn search_pattern(&self) -> Option<String> {
        let term = self.search.trim();
        (!term.is_empty()).then(|| format!("%{term}%"))
    }

    fn category(&self) -> Option<&str> {
        match self.category.trim() {
            "" | "all" => None,
            other => Some(other),
        }
    }
}

#[derive(Deserialize)]
pub struct ProductForm {
    name: String,
    sku: String,
    category: String,
    customer_id: String,
    description: Option<String>,
    dimensions: Option<String>,
    weight: Option<String>,
    active: Option<String>,
}

struct ValidProduct {
    name: String,
    sku: String,
    category: ProductCategory,
    customer_id: Uuid,
    description: Option<String>,
    dimensions: Option<String>,
    weight: Option<Decimal>,
    active: bool,
}

impl ProductForm {
    fn validated(self) -> AppResult<ValidProduct> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("Product name is required"));
        }
        let sku = self.sku.trim().to_string();
        if sku.is_empty() {
            return Err(AppError::validation("SKU is required"));
        }
        let category = ProductCategory::from_label(self.category.trim())
            .ok_or_else(|| AppError::validation(format!("Unknown category: {}", self.category)))?;
        let customer_id = optional_uuid(&self.customer_id)
            .ok_or_else(|| AppError::validation("Choose the customer that owns this product"))?;
        let weight = match blank_to_none(self.weight) {
            Some(raw) => {
                let weight = parse_decimal(&raw, "Weight")?;
                if weight.is_sign_negative() {
                    return Err(AppError::validation("Weight cannot be negative"));
                }
                Some(weight)
            }
            None => None,
        };
        Ok(ValidProduct {
            name,
            sku,
            category,
            customer_id,
            description: blank_to_none(self.description),
            dimensions: blank_to_none(self.dimensions),
            weight,
            active: self.active.is_some(),
        })
    }
}

pub async fn products_list(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<ProductQuery>,
    Query(flash): Query<Flash>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let products = search_products(&state.db, &query).await?;

    render(&ProductsTemplate {
        current_user,
        products,
        customers: customer_choices(&state.db, &query.customer_id).await?,
        categories: category_choices(&query.category),
        query,
        notice: flash.notice,
    })
}

fn category_choices(selected: &str) -> Vec<Choice> {
    choices(ProductCategory::labels().into_iter().map(|l| (l, l)), selected)
}

pub(crate) async fn search_products(db: &Database, query: &ProductQuery) -> AppResult<Vec<ProductDisplay>> {
    let sql = format!(
        r#"{PRODUCT_SELECT}
        WHERE ($1::uuid IS NULL OR p.customer_id = $1)
          AND ($2::text IS NULL OR p.category = $2)
          AND ($3::text IS NULL OR p.name ILIKE $3 OR p.sku ILIKE $3)
        ORDER BY p.created_at DESC"#
    );
    Ok(sqlx::query_as::<_, ProductDisplay>(&sql)
        .bind(optional_uuid(&query.customer_id))
        .bind(query.category())
        .bind(query.search_pattern())
        .fetch_all(db)
        .await?)
}

pub async fn product_form(State(state): State<AppState>, cookies: Cookies) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    render(&ProductFormTemplate {
        current_user,
        product: ProductDisplay {
            active: true,
            ..Default::default()
        },
        is_new: true,
        customers: customer_choices(&state.db, "").await?,
        categories: category_choices(""),
    })
}

pub async fn create_product(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(form): Form<ProductForm>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let input = form.validated()?;

    let product = sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (name, sku, category, customer_id, description, dimensions, weight, active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(&input.name)
    .bind(&input.sku)
    .bind(input.category.label())
    .bind(input.customer_id)
    .bind(&input.description)
    .bind(&input.dimensions)
    .bind(input.weight)
    .bind(input.active)
    .fetch_one(&state.db)
    .await?;

    log::info!("product {} ({}) created", product.sku, product.id);
    state.feed.inserted(TABLE, &product);
    Ok(Redirect::to(&with_notice(
        &format!("/products/{}", product.id),
        "Product added successfully",
    )))
}

pub async fn product_detail(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(product_id): Path<Uuid>,
    Query(flash): Query<Flash>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let product = fetch_product(&state.db, product_id).await?;
    let display = fetch_product_display(&state.db, product_id).await?;

    let stock = sqlx::query_as::<_, InventoryItem>("SELECT * FROM inventory_items WHERE product_id = $1")
        .bind(product_id)
        .fetch_optional(&state.db)
        .await?;

    let movements = sqlx::query_as::<_, MovementDisplay>(&format!(
        "{MOVEMENT_SELECT} WHERE p.id = $1 ORDER BY m.date DESC LIMIT 10"
    ))
    .bind(product_id)
    .fetch_all(&state.db)
    .await?;

    let windows = rates_for(&state.db, product_id).await?;
    let rates = sqlx::query_as::<_, StorageRateDisplay>(&format!(
        "{RATE_SELECT} WHERE r.product_id = $1 ORDER BY r.effective_date DESC"
    ))
    .bind(product_id)
    .fetch_all(&state.db)
    .await?;

    render(&ProductDetailTemplate {
        current_user,
        product: display,
        images: product.images.0,
        stock,
        movements,
        rates,
        current_rate: current_rate(&windows, product_id, Utc::now()),
        notice: flash.notice,
    })
}

pub async fn product_edit_form(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(product_id): Path<Uuid>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let product = fetch_product_display(&state.db, product_id).await?;
    render(&ProductFormTemplate {
        current_user,
        customers: customer_choices(&state.db, &product.customer_id.to_string()).await?,
        categories: category_choices(&product.category),
        product,
        is_new: false,
    })
}

pub async fn update_product(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(product_id): Path<Uuid>,
    Form(form): Form<ProductForm>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let input = form.validated()?;
    let before = fetch_product(&state.db, product_id).await?;

    let after = sqlx::query_as::<_, Product>(
        r#"
        UPDATE products
        SET name = $1, sku = $2, category = $3, customer_id = $4, description = $5,
            dimensions = $6, weight = $7, active = $8, updated_at = NOW()
        WHERE id = $9
        RETURNING *
        "#,
    )
    .bind(&input.name)
    .bind(&input.sku)
    .bind(input.category.label())
    .bind(input.customer_id)
    .bind(&input.description)
    .bind(&input.dimensions)
    .bind(input.weight)
    .bind(input.active)
    .bind(product_id)
    .fetch_one(&state.db)
    .await?;

    state.feed.updated(TABLE, &before, &after);
    Ok(Redirect::to(&with_notice(
        &format!("/products/{product_id}"),
        "Product updated successfully",
    )))
}

pub async fn delete_product(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(product_id): Path<Uuid>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let product = fetch_product(&state.db, product_id).await?;

    sqlx::query("DELETE FROM products WHERE id = $1")
        .bind(product_id)
        .execute(&state.db)
        .await?;

    for image in &product.images.0 {
        if let Some(path) = state.blobs.path_from_url(Bucket::ProductImages, &image.url) {
            state.blobs.remove(Bucket::ProductImages, path).await?;
        }
    }

    log::info!("product {} ({}) deleted", product.sku, product.id);
    state.feed.deleted(TABLE, &product);
    Ok(Redirect::to(&with_notice("/products", "Product removed successfully")))
}

/// Add photos. The first photo a product gets becomes its primary image.
pub async fn upload_images(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(product_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let before = fetch_product(&state.db, product_id).await?;
    let form = MultipartForm::read(multipart).await?;
    let alt = form.text("alt");

    let mut images = before.images.0.clone();
    let mut added = 0;
    for file in form.files_named("images") {
        let extension = storage::image_extension(&file.file_name)?;
        storage::check_size(&file.file_name, file.data.len())?;

        let id = Uuid::new_v4();
        let url = state
            .blobs
            .upload(
                Bucket::ProductImages,
                &format!("{product_id}/{id}.{extension}"),
                &file.data,
            )
            .await?;
        images.push(ProductImage {
            id,
            url,
            alt: alt.clone(),
            primary: images.is_empty(),
        });
        added += 1;
    }
    if added == 0 {
        return Err(AppError::validation("Choose at least one image to upload"));
    }

    let after = save_images(&state.db, product_id, images).await?;
    state.feed.updated(TABLE, &before, &after);
    Ok(Redirect::to(&with_notice(
        &format!("/products/{product_id}"),
        &format!("{added} image(s) uploaded"),
    )))
}

pub async fn set_primary_image(
    State(state): State<AppState>,
    cookies: Cookies,
    Path((product_id, image_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let before = fetch_product(&state.db, product_id).await?;

    let mut images = before.images.0.clone();
    if !mark_primary(&mut images, image_id) {
        return Err(AppError::NotFound("Image"));
    }

    let after = save_images(&state.db, product_id, images).await?;
    state.feed.updated(TABLE, &before, &after);
    Ok(Redirect::to(&with_notice(
        &format!("/products/{product_id}"),
        "Primary image updated",
    )))
}

pub async fn delete_image(
    State(state): State<AppState>,
    cookies: Cookies,
    Path((product_id, image_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let before = fetch_product(&state.db, product_id).await?;

    let (removed, mut kept): (Vec<_>, Vec<_>) = before
        .images
        .0
        .iter()
        .cloned()
        .partition(|i| i.id == image_id);
    let removed = removed.into_iter().next().ok_or(AppError::NotFound("Image"))?;

    if removed.primary {
        if let Some(first) = kept.first_mut() {
            first.primary = true;
        }
    }
    if let Some(path) = state.blobs.path_from_url(Bucket::ProductImages, &removed.url) {
        state.blobs.remove(Bucket::ProductImages, path).await?;
    }

    let after = save_images(&state.db, product_id, kept).await?;
    state.feed.updated(TABLE, &before, &after);
    Ok(Redirect::to(&with_notice(
        &format!("/products/{product_id}"),
        "Image removed",
    )))
}

async fn save_images(db: &Database, product_id: Uuid, images: Vec<ProductImage>) -> AppResult<Product> {
    Ok(sqlx::query_as::<_, Product>(
        "UPDATE products SET images = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(Json(images))
    .bind(product_id)
    .fetch_one(db)
    .await?)
}

pub(crate) async fn fetch_product(db: &Database, product_id: Uuid) -> AppResult<Product> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("Product"))
}

async fn fetch_product_display(db: &Database, product_id: Uuid) -> AppResult<ProductDisplay> {
    sqlx::query_as::<_, ProductDisplay>(&format!("{PRODUCT_SELECT} WHERE p.id = $1"))
        .bind(product_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("Product"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(category: &str, weight: Option<&str>) -> ProductForm {
        ProductForm {
            name: " Chipper 9000 ".into(),
            sku: "WC-9000".into(),
            category: category.into(),
            customer_id: Uuid::new_v4().to_string(),
            description: None,
            dimensions: Some("".into()),
            weight: weight.map(str::to_string),
            active: None,
        }
    }

    #[test]
    fn valid_form_is_normalized() {
        let product = form("Wood Chipper", Some("1250.5")).validated().unwrap();
        assert_eq!(product.name, "Chipper 9000");
        assert_eq!(product.category, ProductCategory::WoodChipper);
        assert_eq!(product.weight, Some(Decimal::new(12505, 1)));
        assert_eq!(product.dimensions, None);
        assert!(!product.active);
    }

    #[test]
    fn unknown_categories_and_negative_weights_are_rejected() {
        assert!(form("Forklift", None).validated().is_err());
        assert!(form("Bucket", Some("-3")).validated().is_err());
    }

    #[test]
    fn missing_customer_is_rejected() {
        let mut f = form("Bucket", None);
        f.customer_id = "all".into();
        assert!(f.validated().is_err());
    }

    #[test]
    fn query_treats_blank_values_as_no_filter() {
        let query = ProductQuery {
            search: "  ".into(),
            category: "all".into(),
            customer_id: String::new(),
        };
        assert_eq!(query.search_pattern(), None);
        assert_eq!(query.category(), None);

        let query = ProductQuery {
            search: "wc-".into(),
            ..Default::default()
        };
        assert_eq!(query.search_pattern().as_deref(), Some("%wc-%"));
    }
}
