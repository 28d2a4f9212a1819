use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::access::AccessCodes;
use crate::generator::{GeminiConfig, RetryPolicy};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_SMTP_PORT: u16 = 465;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid BIND_ADDR '{0}'")]
    BindAddr(String),
}

/// SMTP settings for mailing reports
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

/// Everything the server reads from the environment at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
    pub access: AccessCodes,
    pub gemini: GeminiConfig,
    pub retry: RetryPolicy,
    /// `None` disables mailing; reports are still shown and downloadable
    pub smtp: Option<SmtpConfig>,
}

impl Config {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    ///
    /// Empty values count as unset. Unparsable numbers fall back to their
    /// defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind.parse().map_err(|_| ConfigError::BindAddr(bind.clone()))?;

        let access = AccessCodes::from_config(
            &get("VALID_CODES").unwrap_or_default(),
            get("ADMIN_PASSWORD").as_deref(),
        );
        if access.is_empty() {
            log::warn!("VALID_CODES is empty; only the admin password will be accepted");
        }

        let mut gemini = GeminiConfig {
            api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            ..GeminiConfig::default()
        };
        if let Some(model) = get("GEMINI_MODEL") {
            gemini.model = model;
        }
        if let Some(base_url) = get("GEMINI_BASE_URL") {
            gemini.base_url = base_url.trim_end_matches('/').to_string();
        }
        gemini.timeout_secs = parse_or(&get, "GEMINI_TIMEOUT_SECS", gemini.timeout_secs);

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            base_delay: Duration::from_secs(parse_or(
                &get,
                "RETRY_BASE_DELAY_SECS",
                defaults.base_delay.as_secs(),
            )),
            increment: Duration::from_secs(parse_or(
                &get,
                "RETRY_INCREMENT_SECS",
                defaults.increment.as_secs(),
            )),
        };

        let smtp = match (get("SMTP_SERVER"), get("SMTP_USER"), get("SMTP_PASSWORD")) {
            (Some(server), Some(user), Some(password)) => Some(SmtpConfig {
                from: get("SMTP_FROM").unwrap_or_else(|| user.clone()),
                port: parse_or(&get, "SMTP_PORT", DEFAULT_SMTP_PORT),
                server,
                user,
                password,
            }),
            _ => None,
        };

        Ok(Config {
            bind_addr,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            access,
            gemini,
            retry,
            smtp,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("ignoring invalid {}='{}'", key, raw);
            default
        }),
        None => default,
    }
}
