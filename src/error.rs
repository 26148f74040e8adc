use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::{
    database::is_constraint_violation,
    domain::{audit::AuditError, PostingError},
    storage::StorageError,
};

pub type AppResult<T> = Result<T, AppError>;

/// Every way a request can fail. Validation and business-rule rejections are
/// shown to the operator as-is; platform failures are logged and shown as a
/// generic message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("not signed in")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Cannot create outbound movement for non-existent product: {product}")]
    UntrackedProduct { product: String },

    #[error("Insufficient stock: only {available} units available for {product} ({requested} requested)")]
    InsufficientStock {
        product: String,
        available: i32,
        requested: i32,
    },

    #[error("Stock for {product} changed while this was being saved. Reload and try again.")]
    StockChanged { product: String },

    #[error("This audit has already been completed")]
    AuditClosed,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("template error: {0}")]
    Template(#[from] askama::Error),

    #[error("invalid session: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Attach the product's display name to a posting rejection.
    pub fn from_posting(err: PostingError, product: &str) -> Self {
        match err {
            PostingError::UntrackedProduct => Self::UntrackedProduct {
                product: product.to_string(),
            },
            PostingError::InsufficientStock {
                available,
                requested,
            } => Self::InsufficientStock {
                product: product.to_string(),
                available,
                requested,
            },
            other => Self::Validation(other.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized | AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UntrackedProduct { .. } | AppError::InsufficientStock { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::AuditClosed | AppError::StockChanged { .. } => StatusCode::CONFLICT,
            AppError::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Database(e) if is_constraint_violation(e) => StatusCode::CONFLICT,
            AppError::Storage(StorageError::InvalidPath(_))
            | AppError::Storage(StorageError::Rejected(_)) => StatusCode::BAD_REQUEST,
            AppError::Database(_)
            | AppError::Storage(_)
            | AppError::Template(_)
            | AppError::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the operator.
    pub fn user_message(&self) -> String {
        match self.status() {
            StatusCode::INTERNAL_SERVER_ERROR => {
                "Something went wrong. Please try again.".to_string()
            }
            StatusCode::CONFLICT if matches!(self, AppError::Database(_)) => {
                "The record conflicts with existing data (duplicate value or records still referencing it)."
                    .to_string()
            }
            StatusCode::NOT_FOUND if matches!(self, AppError::Database(_)) => {
                "Record not found".to_string()
            }
            _ => self.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Unauthorized | AppError::Token(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::UntrackedProduct { .. } => "untracked_product",
            AppError::InsufficientStock { .. } => "insufficient_stock",
            AppError::AuditClosed => "audit_closed",
            AppError::StockChanged { .. } => "stock_changed",
            AppError::Database(_) => "database_error",
            AppError::Storage(_) => "storage_error",
            AppError::Template(_) => "template_error",
            AppError::Hash(_) => "internal_error",
        }
    }

    fn log(&self) {
        if self.status().is_server_error() {
            log::error!("{self}");
        } else if !matches!(self, AppError::Unauthorized) {
            log::warn!("request rejected: {self}");
        }
    }
}

impl From<PostingError> for AppError {
    fn from(err: PostingError) -> Self {
        AppError::from_posting(err, "selected product")
    }
}

impl From<AuditError> for AppError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::AlreadyCompleted => AppError::AuditClosed,
            other => AppError::Validation(other.to_string()),
        }
    }
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate {
    status: u16,
    title: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        if matches!(self, AppError::Unauthorized | AppError::Token(_)) {
            return Redirect::to("/login").into_response();
        }

        let status = self.status();
        let page = ErrorTemplate {
            status: status.as_u16(),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.user_message(),
        };
        match page.render() {
            Ok(html) => (status, Html(html)).into_response(),
            Err(_) => (status, page.message).into_response(),
        }
    }
}

/// JSON flavour of [`AppError`] for the `/api` routes.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl<E> From<E> for ApiError
where
    AppError: From<E>,
{
    fn from(err: E) -> Self {
        ApiError(AppError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.0.log();
        (
            self.0.status(),
            Json(json!({
                "error": self.0.code(),
                "message": self.0.user_message(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rules_map_to_unprocessable() {
        let err = AppError::from_posting(
            PostingError::InsufficientStock {
                available: 5,
                requested: 6,
            },
            "Bucket 24in",
        );
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "insufficient_stock");
        assert!(err.user_message().contains("only 5 units available for Bucket 24in"));
    }

    #[test]
    fn untracked_product_names_the_product() {
        let err = AppError::from_posting(PostingError::UntrackedProduct, "Backhoe X");
        assert_eq!(
            err.to_string(),
            "Cannot create outbound movement for non-existent product: Backhoe X"
        );
    }

    #[test]
    fn other_posting_errors_are_validation() {
        let err: AppError = PostingError::InvalidQuantity.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn completed_audit_is_a_conflict() {
        let err: AppError = AuditError::AlreadyCompleted.into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn oversized_quantities_are_validation_errors() {
        let err = AppError::from_posting(PostingError::QuantityTooLarge, "Bucket 24in");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "quantity cannot exceed 1000000 units per line");
    }

    #[test]
    fn stock_changes_underneath_are_conflicts() {
        let err = AppError::StockChanged {
            product: "Stump Grinder".into(),
        };
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.user_message().starts_with("Stock for Stump Grinder changed"));
    }

    #[test]
    fn internal_failures_hide_details() {
        let err = AppError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "Something went wrong. Please try again.");
    }

    #[test]
    fn unauthorized_pages_redirect_to_login() {
        let response = AppError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/login");
    }

    #[test]
    fn api_errors_keep_status() {
        let response = ApiError(AppError::NotFound("Audit")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
