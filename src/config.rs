use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Process-wide configuration, read once at startup and injected through
/// `AppState`. Nothing else in the crate touches the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// External base URL used in emailed links, e.g. `https://app.classment.com`.
    pub public_base_url: String,

    pub jwt_secret: String,
    pub session_ttl_hours: i64,

    pub razorpay_webhook_secret: String,
    pub admin_api_key: String,

    /// Legacy coupon codes honored without a `coupons` table row.
    pub fallback_coupon_codes: Vec<String>,

    pub upload_dir: PathBuf,
    pub static_dir: PathBuf,

    pub smtp: SmtpConfig,

    pub db_max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_raw = optional("BIND_ADDR", "0.0.0.0:8080");
        let port_raw = optional("SMTP_PORT", "587");
        let ttl_raw = optional("SESSION_TTL_HOURS", "168");
        let max_conn_raw = optional("DB_MAX_CONNECTIONS", "10");

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_addr: parse("BIND_ADDR", &bind_raw)?,
            public_base_url: optional("PUBLIC_BASE_URL", "http://localhost:8080")
                .trim_end_matches('/')
                .to_string(),
            jwt_secret: required("JWT_SECRET")?,
            session_ttl_hours: parse("SESSION_TTL_HOURS", &ttl_raw)?,
            razorpay_webhook_secret: required("RAZORPAY_WEBHOOK_SECRET")?,
            admin_api_key: required("ADMIN_API_KEY")?,
            fallback_coupon_codes: parse_coupon_list(&optional("VALID_COUPON_CODES", "NAIROBI")),
            upload_dir: PathBuf::from(optional("UPLOAD_DIR", "uploads")),
            static_dir: PathBuf::from(optional("STATIC_DIR", "public")),
            smtp: SmtpConfig {
                host: required("SMTP_HOST")?,
                port: parse("SMTP_PORT", &port_raw)?,
                username: required("SMTP_USER")?,
                password: required("SMTP_PASS")?,
                from: required("SMTP_FROM")?,
            },
            db_max_connections: parse("DB_MAX_CONNECTIONS", &max_conn_raw)?,
        })
    }
}

/// Comma-separated, case-sensitive, whitespace-trimmed. Empty entries dropped.
fn parse_coupon_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
