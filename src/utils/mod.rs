pub mod auth;
pub mod mailer;
pub mod otp;

pub use auth::{create_token, verify_token, Claims, SESSION_HOURS};
pub use otp::{
    check_attempt, generate_login_code, hash_login_code, validate_login_input, verify_login_code, CodeCheck,
    MAX_CODE_ATTEMPTS,
};
