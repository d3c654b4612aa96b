//! Application configuration, built from environment variables.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default Gemini REST endpoint base.
const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default Gmail REST endpoint base.
const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port for the HTTP approval surface.
    pub port: u16,
    /// Shared secret required on `POST /resolve`.
    pub approval_secret: SecretString,
    /// Path to the local libSQL database file.
    pub db_path: String,
    /// User the ambient loop processes mail for.
    pub user_id: String,
    /// Gemini model name.
    pub model: String,
    /// Gemini API key.
    pub gemini_api_key: SecretString,
    /// Gemini REST base URL (overridable for tests/proxies).
    pub gemini_api_base: String,
    /// Gmail REST base URL (overridable for tests/proxies).
    pub gmail_api_base: String,
    /// Gmail OAuth access token. Obtaining/refreshing it is out of scope;
    /// the token is handed to us ready to use.
    pub gmail_access_token: SecretString,
    /// From address for outbound replies.
    pub from_address: String,
    /// Poll interval for the ambient loop, in seconds.
    pub poll_interval_secs: u64,
    /// Gmail labels the ambient loop watches.
    pub labels: Vec<String>,
    /// Max messages fetched per poll tick.
    pub fetch_batch: usize,
    /// Timeout for collaborator HTTP calls, in seconds.
    pub request_timeout_secs: u64,
    /// Optional directory for daily-rolling log files.
    pub log_dir: Option<String>,
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// `AMBIENT_MAIL_SECRET`, `GEMINI_API_KEY`, and `GMAIL_ACCESS_TOKEN`
    /// are required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let approval_secret = require_env("AMBIENT_MAIL_SECRET")?;
        let gemini_api_key = require_env("GEMINI_API_KEY")?;
        let gmail_access_token = require_env("GMAIL_ACCESS_TOKEN")?;

        let port: u16 = match std::env::var("AMBIENT_MAIL_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "AMBIENT_MAIL_PORT".to_string(),
                message: format!("not a valid port: {raw:?}"),
            })?,
            Err(_) => 8000,
        };

        let db_path = std::env::var("AMBIENT_MAIL_DB_PATH")
            .unwrap_or_else(|_| "./data/ambient-mail.db".to_string());

        let user_id = std::env::var("AMBIENT_MAIL_USER_ID").unwrap_or_else(|_| "u_local".to_string());

        let model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());

        let gemini_api_base = std::env::var("GEMINI_API_BASE")
            .unwrap_or_else(|_| DEFAULT_GEMINI_API_BASE.to_string());

        let gmail_api_base =
            std::env::var("GMAIL_API_BASE").unwrap_or_else(|_| DEFAULT_GMAIL_API_BASE.to_string());

        let from_address = std::env::var("AMBIENT_MAIL_FROM")
            .unwrap_or_else(|_| "ambient-mail@localhost".to_string());

        let poll_interval_secs: u64 = std::env::var("POLL_INTERVAL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);

        let labels: Vec<String> = std::env::var("LABELS_TO_WATCH")
            .unwrap_or_else(|_| "INBOX".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let fetch_batch: usize = std::env::var("AMBIENT_MAIL_FETCH_BATCH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);

        let request_timeout_secs: u64 = std::env::var("AMBIENT_MAIL_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let log_dir = std::env::var("AMBIENT_MAIL_LOG_DIR").ok();

        Ok(Self {
            port,
            approval_secret,
            db_path,
            user_id,
            model,
            gemini_api_key,
            gemini_api_base,
            gmail_api_base,
            gmail_access_token,
            from_address,
            poll_interval_secs,
            labels,
            fetch_batch,
            request_timeout_secs,
            log_dir,
        })
    }
}

fn require_env(key: &str) -> Result<SecretString, ConfigError> {
    std::env::var(key)
        .map(SecretString::from)
        .map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}
