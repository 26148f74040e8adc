use rand::Rng;

pub const CODE_LENGTH: usize = 6;

/// Verification attempts one code allows, right or wrong.
pub const MAX_CODE_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    Accepted,
    Rejected { remaining: i32 },
    /// The code is used up; a new one has to be requested.
    Exhausted,
}

/// Judge the `attempt`-th try (counting from 1) at a code.
pub fn check_attempt(attempt: i32, matches: bool) -> CodeCheck {
    if attempt > MAX_CODE_ATTEMPTS {
        CodeCheck::Exhausted
    } else if matches {
        CodeCheck::Accepted
    } else if attempt == MAX_CODE_ATTEMPTS {
        CodeCheck::Exhausted
    } else {
        CodeCheck::Rejected {
            remaining: MAX_CODE_ATTEMPTS - attempt,
        }
    }
}

/// Six random digits, zero padded.
pub fn generate_login_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

pub fn hash_login_code(code: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(code, bcrypt::DEFAULT_COST)
}

pub fn verify_login_code(code: &str, hash: &str) -> bool {
    bcrypt::verify(code, hash).unwrap_or(false)
}

/// Shape checks done before any database work: a plausible email and a
/// code of exactly six digits.
pub fn validate_login_input(email: &str, code: &str) -> Result<(), &'static str> {
    if !is_plausible_email(email) {
        return Err("Please enter a valid email address");
    }
    if code.len() != CODE_LENGTH || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err("The verification code must be 6 digits");
    }
    Ok(())
}

pub fn is_plausible_email(email: &str) -> bool {
    match email.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}
