use std::env;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime settings read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub public_base_url: String,
    pub cookie_secure: bool,
    pub login_code_ttl_minutes: i64,
    /// Log sign-in emails in full. Development only.
    pub log_login_codes: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { name: "PORT", value: raw })?,
            None => 3000,
        };

        let flag = |name: &'static str| -> Result<bool, ConfigError> {
            match lookup(name).as_deref() {
                None | Some("") | Some("false") | Some("0") => Ok(false),
                Some("true") | Some("1") => Ok(true),
                Some(other) => Err(ConfigError::Invalid {
                    name,
                    value: other.to_string(),
                }),
            }
        };

        let login_code_ttl_minutes = match lookup("LOGIN_CODE_TTL_MINUTES") {
            Some(raw) => match raw.parse::<i64>() {
                Ok(v) if v > 0 => v,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "LOGIN_CODE_TTL_MINUTES",
                        value: raw,
                    })
                }
            },
            None => 10,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            port,
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            public_base_url: lookup("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            cookie_secure: flag("COOKIE_SECURE")?,
            login_code_ttl_minutes,
            log_login_codes: flag("LOG_LOGIN_CODES")?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_values_are_absent() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/stockroom"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.public_base_url, "");
        assert!(!config.cookie_secure);
        assert_eq!(config.login_code_ttl_minutes, 10);
        assert!(!config.log_login_codes);
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn missing_secret_is_reported() {
        let err = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JWT_SECRET")));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }

    #[test]
    fn base_url_loses_trailing_slash() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("PUBLIC_BASE_URL", "https://wh.example.com/"),
            ("COOKIE_SECURE", "true"),
        ]))
        .unwrap();
        assert_eq!(config.public_base_url, "https://wh.example.com");
        assert!(config.cookie_secure);
    }

    #[test]
    fn code_logging_is_an_explicit_opt_in() {
        let base = [("DATABASE_URL", "postgres://x"), ("JWT_SECRET", "s")];
        let config = Config::from_lookup(lookup(&[base[0], base[1], ("LOG_LOGIN_CODES", "true")])).unwrap();
        assert!(config.log_login_codes);

        let err = Config::from_lookup(lookup(&[base[0], base[1], ("LOG_LOGIN_CODES", "yes")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "LOG_LOGIN_CODES", .. }));
    }
}
