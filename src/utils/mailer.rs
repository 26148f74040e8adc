use askama::Template;

#[derive(Template)]
#[template(path = "email/login_code.html")]
struct LoginCodeEmail<'a> {
    code: &'a str,
    ttl_minutes: i64,
}

/// A rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

pub fn login_code_email(to: &str, code: &str, ttl_minutes: i64) -> Result<OutgoingEmail, askama::Error> {
    let html = LoginCodeEmail { code, ttl_minutes }.render()?;
    Ok(OutgoingEmail {
        to: to.to_string(),
        subject: "Your Stockroom sign-in code".to_string(),
        html,
    })
}

/// Hand a message to the delivery transport. Email delivery is provided
/// outside this service; the built-in transport writes to the log.
///
/// The body carries the sign-in code, so it is only logged when
/// `reveal_body` is set (`LOG_LOGIN_CODES`, local development only).
pub fn deliver(email: &OutgoingEmail, reveal_body: bool) {
    if reveal_body {
        log::info!("{}", log_entry(email, true));
    } else {
        log::debug!("{}", log_entry(email, false));
    }
}

fn log_entry(email: &OutgoingEmail, reveal_body: bool) -> String {
    if reveal_body {
        format!("email to {} ({}):\n{}", email.to, email.subject, email.html)
    } else {
        format!("email to {} ({}): body redacted", email.to, email.subject)
    }
}
