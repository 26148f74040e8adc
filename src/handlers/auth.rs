use std::sync::Arc;

use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use askama::Template;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tower_cookies::{cookie::SameSite, Cookie, Cookies};

use crate::{
    config::Config,
    database::Database,
    error::{ApiError, AppResult},
    middleware::AUTH_COOKIE,
    models::{user::LoginCode, User},
    utils::{
        check_attempt, create_token, generate_login_code, hash_login_code, mailer,
        otp::is_plausible_email, validate_login_input, verify_login_code, CodeCheck,
        MAX_CODE_ATTEMPTS, SESSION_HOURS,
    },
};

use super::{render, Flash};

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    email: String,
    error: String,
    notice: String,
}

#[derive(Template)]
#[template(path = "login_verify.html")]
struct VerifyTemplate {
    email: String,
    error: String,
    notice: String,
}

#[derive(Deserialize)]
pub struct RequestCodeForm {
    email: String,
}

#[derive(Deserialize)]
pub struct VerifyForm {
    email: String,
    token: String,
}

#[derive(Deserialize)]
pub struct CheckEmailRequest {
    email: String,
}

#[derive(Serialize)]
pub struct CheckEmailResponse {
    exists: bool,
}

fn login_page_with(status: StatusCode, email: String, error: &str) -> AppResult<Response> {
    let page = LoginTemplate {
        email,
        error: error.to_string(),
        notice: String::new(),
    };
    Ok((status, render(&page)?).into_response())
}

fn verify_page_with(status: StatusCode, email: String, error: &str, notice: &str) -> AppResult<Response> {
    let page = VerifyTemplate {
        email,
        error: error.to_string(),
        notice: notice.to_string(),
    };
    Ok((status, render(&page)?).into_response())
}

pub async fn login_page(Query(flash): Query<Flash>) -> AppResult<Html<String>> {
    render(&LoginTemplate {
        email: String::new(),
        error: flash.error,
        notice: flash.notice,
    })
}

/// Step one: mail a one-time code to a known, active user.
pub async fn request_code(
    State(db): State<Database>,
    State(config): State<Arc<Config>>,
    Form(form): Form<RequestCodeForm>,
) -> AppResult<Response> {
    let email = form.email.trim().to_lowercase();
    if !is_plausible_email(&email) {
        return login_page_with(StatusCode::BAD_REQUEST, email, "Please enter a valid email address");
    }

    if find_active_user(&db, &email).await?.is_none() {
        return login_page_with(
            StatusCode::NOT_FOUND,
            email,
            "No account exists for this email. Ask an administrator to invite you.",
        );
    }

    let code = generate_login_code();
    let expires_at = Utc::now() + Duration::minutes(config.login_code_ttl_minutes);
    sqlx::query("INSERT INTO login_codes (email, code_hash, expires_at) VALUES ($1, $2, $3)")
        .bind(&email)
        .bind(hash_login_code(&code)?)
        .bind(expires_at)
        .execute(&db)
        .await?;

    let message = mailer::login_code_email(&email, &code, config.login_code_ttl_minutes)?;
    mailer::deliver(&message, config.log_login_codes);

    verify_page_with(
        StatusCode::OK,
        email,
        "",
        "Please check your email for the verification code.",
    )
}

/// Step two: exchange the code for a session cookie.
pub async fn verify_code(
    State(db): State<Database>,
    State(config): State<Arc<Config>>,
    cookies: Cookies,
    Form(form): Form<VerifyForm>,
) -> AppResult<Response> {
    let email = form.email.trim().to_lowercase();
    let token = form.token.trim();

    if let Err(msg) = validate_login_input(&email, token) {
        return verify_page_with(StatusCode::BAD_REQUEST, email, msg, "");
    }

    // Every try spends one attempt on the newest live code.
    let pending = sqlx::query_as::<_, LoginCode>(
        r#"
        UPDATE login_codes SET attempts = attempts + 1
        WHERE id = (
            SELECT id FROM login_codes
            WHERE email = $1 AND consumed_at IS NULL AND expires_at > NOW()
            ORDER BY created_at DESC
            LIMIT 1
        )
        AND attempts < $2
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(MAX_CODE_ATTEMPTS)
    .fetch_optional(&db)
    .await?;

    let Some(pending) = pending else {
        return verify_page_with(
            StatusCode::UNAUTHORIZED,
            email,
            "Invalid or expired verification code",
            "",
        );
    };

    match check_attempt(pending.attempts, verify_login_code(token, &pending.code_hash)) {
        CodeCheck::Accepted => {}
        CodeCheck::Rejected { remaining } => {
            return verify_page_with(
                StatusCode::UNAUTHORIZED,
                email,
                &format!("Invalid verification code. {remaining} attempt(s) left."),
                "",
            );
        }
        CodeCheck::Exhausted => {
            log::warn!("sign-in code for {email} locked after {MAX_CODE_ATTEMPTS} attempts");
            return login_page_with(
                StatusCode::UNAUTHORIZED,
                email,
                "Too many incorrect codes. Please request a new one.",
            );
        }
    }

    let Some(user) = find_active_user(&db, &email).await? else {
        return login_page_with(StatusCode::UNAUTHORIZED, email, "This account is no longer active");
    };

    let consumed = sqlx::query("UPDATE login_codes SET consumed_at = NOW() WHERE id = $1 AND consumed_at IS NULL")
        .bind(pending.id)
        .execute(&db)
        .await?
        .rows_affected();
    if consumed != 1 {
        return verify_page_with(
            StatusCode::UNAUTHORIZED,
            email,
            "Invalid or expired verification code",
            "",
        );
    }

    sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&db)
        .await?;

    let session = create_token(user.id, user.email.clone(), &config.jwt_secret)?;

    // Set secure HTTP-only cookie with JWT token
    let cookie = Cookie::build((AUTH_COOKIE, session))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(time::Duration::hours(SESSION_HOURS))
        .build();
    cookies.add(cookie);

    log::info!("user {} signed in", user.email);
    Ok(Redirect::to("/").into_response())
}

pub async fn logout(cookies: Cookies) -> impl IntoResponse {
    let mut cookie = Cookie::from(AUTH_COOKIE);
    cookie.set_path("/");
    cookies.remove(cookie);
    Redirect::to("/login")
}

pub async fn check_email(
    State(db): State<Database>,
    Json(body): Json<CheckEmailRequest>,
) -> Result<Json<CheckEmailResponse>, ApiError> {
    let email = body.email.trim().to_lowercase();
    let exists = find_active_user(&db, &email).await?.is_some();
    Ok(Json(CheckEmailResponse { exists }))
}

async fn find_active_user(db: &Database, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1 AND is_active = true")
        .bind(email)
        .fetch_optional(db)
        .await
}
