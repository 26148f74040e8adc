use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    error::AppError,
    models::User,
    utils::verify_token,
};

pub const AUTH_COOKIE: &str = "auth_token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

impl From<User> for CurrentUser {
    fn from(user: User) -> Self {
        Self {
            name: user.display_name().to_string(),
            id: user.id,
            email: user.email,
        }
    }
}

/// Resolve the signed-in user from the session cookie. Missing, expired or
/// forged tokens, and users deactivated since sign-in, all yield `None`.
pub async fn get_current_user(cookies: &Cookies, db: &Database, secret: &str) -> Option<CurrentUser> {
    let token = cookies.get(AUTH_COOKIE)?.value().to_string();

    let claims = match verify_token(&token, secret) {
        Ok(claims) => claims,
        Err(e) => {
            log::debug!("rejected session token: {e}");
            return None;
        }
    };

    let user_id = claims.user_id()?;
    get_user_by_id(db, user_id).await
}

/// Like [`get_current_user`] but as an error for `?`.
pub async fn require_user(cookies: &Cookies, db: &Database, secret: &str) -> Result<CurrentUser, AppError> {
    get_current_user(cookies, db, secret)
        .await
        .ok_or(AppError::Unauthorized)
}

async fn get_user_by_id(db: &Database, user_id: Uuid) -> Option<CurrentUser> {
    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE id = $1 AND is_active = true"
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
    .map_err(|e| log::error!("failed to load session user: {e}"))
    .ok()??;

    Some(CurrentUser::from(user))
}
