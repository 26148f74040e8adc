use axum::{
    extract::{Form, Path, Query, State},
    response::{Html, Redirect},
};
use axum_extra::extract::Multipart;
use askama::Template;
use chrono::Utc;
use serde::Deserialize;
use sqlx::types::Json;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    domain::codes::generate_customer_code,
    error::{AppError, AppResult},
    filters,
    middleware::{require_user, CurrentUser},
    models::{Customer, CustomerDisplay, CustomerDocument, ProductDisplay},
    state::AppState,
    storage::{self, BlobStore, Bucket},
};

use super::{
    blank_to_none, products::PRODUCT_SELECT, render, with_notice, Flash, MultipartForm, UploadedFile,
};

const TABLE: &str = "customers";

#[derive(Template)]
#[template(path = "customers/list.html")]
struct CustomersTemplate {
    current_user: CurrentUser,
    customers: Vec<CustomerDisplay>,
    notice: String,
}

#[derive(Template)]
#[template(path = "customers/form.html")]
struct CustomerFormTemplate {
    current_user: CurrentUser,
    customer: CustomerDisplay,
    is_new: bool,
}

#[derive(Template)]
#[template(path = "customers/detail.html")]
struct CustomerDetailTemplate {
    current_user: CurrentUser,
    customer: CustomerDisplay,
    products: Vec<ProductDisplay>,
    notice: String,
}

#[derive(Deserialize)]
pub struct CustomerForm {
    name: String,
    code: Option<String>,
    contact_name: Option<String>,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    active: Option<String>, // HTML checkboxes send "on" or nothing
}

impl CustomerForm {
    fn validated(self) -> AppResult<ValidCustomer> {
        let name = self.name.trim().to_string();
        if name.len() < 2 {
            return Err(AppError::validation("Company name must be at least 2 characters"));
        }
        let code = blank_to_none(self.code)
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| generate_customer_code(&name));
        if code.is_empty() {
            return Err(AppError::validation("Customer code cannot be empty"));
        }
        let contact_email = blank_to_none(self.contact_email);
        if let Some(email) = &contact_email {
            if !crate::utils::otp::is_plausible_email(email) {
                return Err(AppError::validation("Contact email is not a valid email address"));
            }
        }
        Ok(ValidCustomer {
            name,
            code,
            contact_name: blank_to_none(self.contact_name),
            contact_email,
            contact_phone: blank_to_none(self.contact_phone),
            active: self.active.is_some(),
        })
    }
}

struct ValidCustomer {
    name: String,
    code: String,
    contact_name: Option<String>,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    active: bool,
}

pub async fn customers_list(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(flash): Query<Flash>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;

    let customers = sqlx::query_as::<_, Customer>("SELECT * FROM customers ORDER BY name")
        .fetch_all(&state.db)
        .await?
        .into_iter()
        .map(CustomerDisplay::from)
        .collect();

    render(&CustomersTemplate {
        current_user,
        customers,
        notice: flash.notice,
    })
}

pub async fn customer_form(State(state): State<AppState>, cookies: Cookies) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    render(&CustomerFormTemplate {
        current_user,
        customer: CustomerDisplay {
            active: true,
            ..Default::default()
        },
        is_new: true,
    })
}

pub async fn create_customer(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(form): Form<CustomerForm>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let input = form.validated()?;

    let customer = sqlx::query_as::<_, Customer>(
        r#"
        INSERT INTO customers (name, code, contact_name, contact_email, contact_phone, active)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&input.name)
    .bind(&input.code)
    .bind(&input.contact_name)
    .bind(&input.contact_email)
    .bind(&input.contact_phone)
    .bind(input.active)
    .fetch_one(&state.db)
    .await?;

    state.feed.inserted(TABLE, &customer);
    Ok(Redirect::to(&with_notice("/customers", "Customer added successfully")))
}

pub async fn customer_detail(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(customer_id): Path<Uuid>,
    Query(flash): Query<Flash>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let customer = fetch_customer(&state, customer_id).await?;

    let products = sqlx::query_as::<_, ProductDisplay>(&format!(
        "{PRODUCT_SELECT} WHERE p.customer_id = $1 ORDER BY p.name"
    ))
    .bind(customer_id)
    .fetch_all(&state.db)
    .await?;

    render(&CustomerDetailTemplate {
        current_user,
        customer: customer.into(),
        products,
        notice: flash.notice,
    })
}

pub async fn customer_edit_form(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(customer_id): Path<Uuid>,
) -> AppResult<Html<String>> {
    let current_user = require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let customer = fetch_customer(&state, customer_id).await?;
    render(&CustomerFormTemplate {
        current_user,
        customer: customer.into(),
        is_new: false,
    })
}

pub async fn update_customer(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(customer_id): Path<Uuid>,
    Form(form): Form<CustomerForm>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let input = form.validated()?;
    let before = fetch_customer(&state, customer_id).await?;

    let after = sqlx::query_as::<_, Customer>(
        r#"
        UPDATE customers
        SET name = $1, code = $2, contact_name = $3, contact_email = $4, contact_phone = $5,
            active = $6, updated_at = NOW()
        WHERE id = $7
        RETURNING *
        "#,
    )
    .bind(&input.name)
    .bind(&input.code)
    .bind(&input.contact_name)
    .bind(&input.contact_email)
    .bind(&input.contact_phone)
    .bind(input.active)
    .bind(customer_id)
    .fetch_one(&state.db)
    .await?;

    state.feed.updated(TABLE, &before, &after);
    Ok(Redirect::to(&with_notice(
        &format!("/customers/{customer_id}"),
        "Customer updated successfully",
    )))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(customer_id): Path<Uuid>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let customer = fetch_customer(&state, customer_id).await?;

    sqlx::query("DELETE FROM customers WHERE id = $1")
        .bind(customer_id)
        .execute(&state.db)
        .await?;

    if let Some(path) = customer
        .logo_url
        .as_deref()
        .and_then(|url| state.blobs.path_from_url(Bucket::CustomerDocuments, url))
    {
        state.blobs.remove(Bucket::CustomerDocuments, path).await?;
    }
    for doc in &customer.documents.0 {
        if let Some(path) = state.blobs.path_from_url(Bucket::CustomerDocuments, &doc.url) {
            state.blobs.remove(Bucket::CustomerDocuments, path).await?;
        }
    }

    state.feed.deleted(TABLE, &customer);
    Ok(Redirect::to(&with_notice("/customers", "Customer removed successfully")))
}

/// Replace the customer's logo.
pub async fn upload_logo(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(customer_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let before = fetch_customer(&state, customer_id).await?;
    let form = MultipartForm::read(multipart).await?;

    let file = form
        .files_named("logo")
        .next()
        .ok_or_else(|| AppError::validation("Choose an image to upload"))?;
    let extension = storage::image_extension(&file.file_name)?;
    storage::check_size(&file.file_name, file.data.len())?;

    let url = state
        .blobs
        .upload(
            Bucket::CustomerDocuments,
            &format!("{customer_id}/logo.{extension}"),
            &file.data,
        )
        .await?;

    let after = sqlx::query_as::<_, Customer>(
        "UPDATE customers SET logo_url = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(&url)
    .bind(customer_id)
    .fetch_one(&state.db)
    .await?;

    if let Some(stale) = replaced_logo(before.logo_url.as_deref(), &url) {
        discard_blob(&state.blobs, stale).await;
    }

    state.feed.updated(TABLE, &before, &after);
    Ok(Redirect::to(&with_notice(
        &format!("/customers/{customer_id}"),
        "Logo updated",
    )))
}

/// The previous logo, when the new one was stored under another name.
fn replaced_logo<'a>(previous: Option<&'a str>, current: &str) -> Option<&'a str> {
    previous.filter(|url| *url != current)
}

async fn discard_blob(blobs: &BlobStore, url: &str) {
    let Some(path) = blobs.path_from_url(Bucket::CustomerDocuments, url) else {
        return;
    };
    if let Err(e) = blobs.remove(Bucket::CustomerDocuments, path).await {
        log::warn!("could not remove customer file {url}: {e}");
    }
}

/// Every file of a document upload with its extension. The whole batch is
/// checked before anything is written.
fn accepted_documents(form: &MultipartForm) -> AppResult<Vec<(&UploadedFile, String)>> {
    let mut accepted = Vec::new();
    for file in form.files_named("documents") {
        storage::check_size(&file.file_name, file.data.len())?;
        let extension = std::path::Path::new(&file.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_lowercase();
        accepted.push((file, extension));
    }
    if accepted.is_empty() {
        return Err(AppError::validation("Choose at least one document to upload"));
    }
    Ok(accepted)
}

/// Attach one or more documents to the customer record.
pub async fn upload_documents(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(customer_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let before = fetch_customer(&state, customer_id).await?;
    let form = MultipartForm::read(multipart).await?;

    let accepted = accepted_documents(&form)?;

    let mut uploaded = Vec::with_capacity(accepted.len());
    for (file, extension) in accepted {
        let id = Uuid::new_v4();
        let stored = state
            .blobs
            .upload(
                Bucket::CustomerDocuments,
                &format!("{customer_id}/documents/{id}.{extension}"),
                &file.data,
            )
            .await;
        let url = match stored {
            Ok(url) => url,
            Err(e) => {
                discard_documents(&state.blobs, &uploaded).await;
                return Err(e.into());
            }
        };
        uploaded.push(CustomerDocument {
            id,
            name: file.file_name.clone(),
            kind: storage::content_type_for(&extension).to_string(),
            url,
            uploaded_at: Utc::now(),
        });
    }

    let added = uploaded.len();
    let mut documents = before.documents.0.clone();
    documents.extend(uploaded.iter().cloned());
    let after = match save_documents(&state, customer_id, documents).await {
        Ok(after) => after,
        Err(e) => {
            discard_documents(&state.blobs, &uploaded).await;
            return Err(e);
        }
    };
    state.feed.updated(TABLE, &before, &after);
    Ok(Redirect::to(&with_notice(
        &format!("/customers/{customer_id}"),
        &format!("{added} document(s) uploaded"),
    )))
}

async fn discard_documents(blobs: &BlobStore, documents: &[CustomerDocument]) {
    for document in documents {
        discard_blob(blobs, &document.url).await;
    }
}

pub async fn delete_document(
    State(state): State<AppState>,
    cookies: Cookies,
    Path((customer_id, document_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state.db, &state.config.jwt_secret).await?;
    let before = fetch_customer(&state, customer_id).await?;

    let (removed, kept): (Vec<_>, Vec<_>) = before
        .documents
        .0
        .iter()
        .cloned()
        .partition(|d| d.id == document_id);
    let removed = removed.into_iter().next().ok_or(AppError::NotFound("Document"))?;

    if let Some(path) = state.blobs.path_from_url(Bucket::CustomerDocuments, &removed.url) {
        state.blobs.remove(Bucket::CustomerDocuments, path).await?;
    }

    let after = save_documents(&state, customer_id, kept).await?;
    state.feed.updated(TABLE, &before, &after);
    Ok(Redirect::to(&with_notice(
        &format!("/customers/{customer_id}"),
        "Document removed",
    )))
}

async fn save_documents(
    state: &AppState,
    customer_id: Uuid,
    documents: Vec<CustomerDocument>,
) -> AppResult<Customer> {
    Ok(sqlx::query_as::<_, Customer>(
        "UPDATE customers SET documents = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(Json(documents))
    .bind(customer_id)
    .fetch_one(&state.db)
    .await?)
}

async fn fetch_customer(state: &AppState, customer_id: Uuid) -> AppResult<Customer> {
    sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
        .bind(customer_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("Customer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, code: Option<&str>, email: Option<&str>) -> CustomerForm {
        CustomerForm {
            name: name.to_string(),
            code: code.map(str::to_string),
            contact_name: None,
            contact_email: email.map(str::to_string),
            contact_phone: Some("  ".into()),
            active: Some("on".into()),
        }
    }

    fn upload(field: &str, file_name: &str, size: usize) -> UploadedFile {
        UploadedFile {
            field: field.to_string(),
            file_name: file_name.to_string(),
            data: vec![0u8; size].into(),
        }
    }

    #[test]
    fn one_oversized_document_rejects_the_batch() {
        let form = MultipartForm {
            files: vec![
                upload("documents", "contract.pdf", 1024),
                upload("documents", "scan.tiff", storage::MAX_IMAGE_BYTES + 1),
            ],
            ..Default::default()
        };
        assert!(accepted_documents(&form).is_err());
    }

    #[test]
    fn documents_keep_their_extension() {
        let form = MultipartForm {
            files: vec![
                upload("documents", "Contract.PDF", 10),
                upload("documents", "notes", 10),
                upload("logo", "logo.png", 10),
            ],
            ..Default::default()
        };
        let accepted = accepted_documents(&form).unwrap();
        let extensions: Vec<&str> = accepted.iter().map(|(_, ext)| ext.as_str()).collect();
        assert_eq!(extensions, vec!["pdf", "bin"]);

        let empty = MultipartForm::default();
        assert!(accepted_documents(&empty).is_err());
    }

    #[test]
    fn logo_stored_under_a_new_name_replaces_the_old_file() {
        let png = "/uploads/customer-documents/c1/logo.png";
        let jpg = "/uploads/customer-documents/c1/logo.jpg";
        assert_eq!(replaced_logo(Some(png), jpg), Some(png));
        assert_eq!(replaced_logo(Some(png), png), None);
        assert_eq!(replaced_logo(None, png), None);
    }

    #[test]
    fn blank_code_is_generated_from_name() {
        let valid = form("GreenTech Solutions", Some(""), None).validated().unwrap();
        assert_eq!(valid.code, "GS");
        assert!(valid.active);
        assert_eq!(valid.contact_phone, None);
    }

    #[test]
    fn explicit_code_is_upper_cased() {
        let valid = form("PowerTools Pro", Some("ptp1"), None).validated().unwrap();
        assert_eq!(valid.code, "PTP1");
    }

    #[test]
    fn short_names_and_bad_emails_are_rejected() {
        assert!(form("A", None, None).validated().is_err());
        assert!(form("Acme", None, Some("acme")).validated().is_err());
    }
}
