pub mod api;
pub mod audits;
pub mod auth;
pub mod customers;
pub mod dashboard;
pub mod inventory;
pub mod movements;
pub mod products;
pub mod rates;
pub mod realtime;

use std::collections::HashMap;

use askama::Template;
use axum::{body::Bytes, response::Html};
use axum_extra::extract::Multipart;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    database::Database,
    error::{AppError, AppResult},
    models::{CustomerOption, ProductOption},
};

/// `?notice=` / `?error=` carried across a redirect and shown as a toast.
#[derive(Debug, Default, Deserialize)]
pub struct Flash {
    #[serde(default)]
    pub notice: String,
    #[serde(default)]
    pub error: String,
}

pub fn render<T: Template>(template: &T) -> AppResult<Html<String>> {
    Ok(Html(template.render()?))
}

/// Redirect target with a toast message attached.
pub fn with_notice(path: &str, message: &str) -> String {
    format!("{}?notice={}", path, urlencoding::encode(message))
}

pub fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Select boxes submit "" or "all" for "no filter".
pub fn optional_uuid(value: &str) -> Option<Uuid> {
    match value.trim() {
        "" | "all" => None,
        other => Uuid::parse_str(other).ok(),
    }
}

pub fn optional_date(value: Option<&str>) -> AppResult<Option<NaiveDate>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| AppError::validation(format!("Invalid date: {raw}"))),
    }
}

/// A `<input type="date">` value as midnight UTC.
pub fn date_to_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

pub fn parse_decimal(value: &str, field: &str) -> AppResult<Decimal> {
    Decimal::from_str(value.trim())
        .map_err(|_| AppError::validation(format!("{field} must be a number")))
}

pub fn parse_quantity(value: &str, field: &str) -> AppResult<i32> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| AppError::validation(format!("{field} must be a whole number")))
}

async fn customer_options(db: &Database) -> AppResult<Vec<CustomerOption>> {
    Ok(
        sqlx::query_as::<_, CustomerOption>("SELECT id, name FROM customers ORDER BY name")
            .fetch_all(db)
            .await?,
    )
}

async fn product_options(db: &Database) -> AppResult<Vec<ProductOption>> {
    Ok(
        sqlx::query_as::<_, ProductOption>("SELECT id, name, sku FROM products ORDER BY name")
            .fetch_all(db)
            .await?,
    )
}

/// One `<option>` of a select box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

/// Build select options, marking the one whose value equals `selected`.
pub fn choices<I, V, L>(items: I, selected: &str) -> Vec<Choice>
where
    I: IntoIterator<Item = (V, L)>,
    V: ToString,
    L: Into<String>,
{
    items
        .into_iter()
        .map(|(value, label)| {
            let value = value.to_string();
            Choice {
                selected: value == selected,
                value,
                label: label.into(),
            }
        })
        .collect()
}

pub async fn customer_choices(db: &Database, selected: &str) -> AppResult<Vec<Choice>> {
    let customers = customer_options(db).await?;
    Ok(choices(customers.into_iter().map(|c| (c.id, c.name)), selected))
}

pub async fn product_choices(db: &Database, selected: &str) -> AppResult<Vec<Choice>> {
    let products = product_options(db).await?;
    Ok(choices(
        products
            .into_iter()
            .map(|p| (p.id, format!("{} ({})", p.name, p.sku))),
        selected,
    ))
}

/// A file part of a multipart form.
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub data: Bytes,
}

/// Text fields (repeatable, in submission order) and file parts of a
/// multipart form. Empty file inputs are skipped.
#[derive(Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, Vec<String>>,
    pub files: Vec<UploadedFile>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = MultipartForm::default();
        let bad_request = |e: axum_extra::extract::multipart::MultipartError| {
            AppError::validation(format!("Malformed upload: {e}"))
        };

        while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
            let name = match field.name() {
                Some(name) => name.to_string(),
                None => continue,
            };

            match field.file_name().map(|s| s.to_string()) {
                Some(file_name) => {
                    let data = field.bytes().await.map_err(bad_request)?;
                    if !file_name.is_empty() && !data.is_empty() {
                        form.files.push(UploadedFile { field: name, file_name, data });
                    }
                }
                None => {
                    let text = field.text().await.map_err(bad_request)?;
                    form.fields.entry(name).or_default().push(text);
                }
            }
        }
        Ok(form)
    }

    /// First value of a text field, trimmed; `None` when absent or blank.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .and_then(|values| values.first())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn all(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn files_named<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a UploadedFile> + 'a {
        self.files.iter().filter(move |f| f.field == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_is_url_encoded() {
        assert_eq!(
            with_notice("/customers", "Customer added successfully"),
            "/customers?notice=Customer%20added%20successfully"
        );
    }

    #[test]
    fn blank_values_become_none() {
        assert_eq!(blank_to_none(Some("  ".into())), None);
        assert_eq!(blank_to_none(Some(" x ".into())), Some("x".into()));
        assert_eq!(blank_to_none(None), None);
    }

    #[test]
    fn filter_selects_map_all_to_none() {
        assert_eq!(optional_uuid("all"), None);
        assert_eq!(optional_uuid(""), None);
        assert_eq!(optional_uuid("not-a-uuid"), None);
        let id = Uuid::new_v4();
        assert_eq!(optional_uuid(&id.to_string()), Some(id));
    }

    #[test]
    fn date_parsing_rejects_garbage() {
        assert_eq!(optional_date(Some("")).unwrap(), None);
        assert_eq!(
            optional_date(Some("2024-02-29")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert!(optional_date(Some("29/02/2024")).is_err());
    }

    #[test]
    fn choices_mark_the_selected_value() {
        let options = choices(vec![("a", "Alpha"), ("b", "Beta")], "b");
        assert!(!options[0].selected);
        assert!(options[1].selected);
        assert_eq!(options[1].label, "Beta");
    }

    #[test]
    fn numeric_fields_report_their_name() {
        let err = parse_quantity("ten", "Quantity").unwrap_err();
        assert_eq!(err.to_string(), "Quantity must be a whole number");
        assert_eq!(parse_decimal(" 12.50 ", "Rate").unwrap(), Decimal::new(1250, 2));
    }
}
