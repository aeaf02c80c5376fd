//! Configuration for the mailbox, SMTP relay, summarizer, and HTTP surface
//!
//! All configuration is loaded from environment variables prefixed with
//! `MAIL_DIGEST_`. Loading goes through a lookup function so the rest of the
//! crate receives an explicit [`ServerConfig`] and never reads ambient state.

use std::env;
use std::env::VarError;
use std::str::FromStr;

use chrono_tz::Tz;
use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// Default reference zone for `local_time`
pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";
/// Default chat-completions API base
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Default summarization model
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// IMAP mailbox configuration
///
/// Passwords are stored using `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    /// IMAP server hostname
    pub host: String,
    /// IMAP server port (typically 993 for TLS)
    pub port: u16,
    /// Whether to use TLS (connections with `false` are refused)
    pub secure: bool,
    /// Username for authentication
    pub user: String,
    /// Password stored in a type that prevents accidental logging
    pub pass: SecretString,
}

/// SMTP relay configuration
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP server hostname
    pub host: String,
    /// 465 selects implicit TLS, anything else uses STARTTLS
    pub port: u16,
    /// Login user, also used as the sender address
    pub user: String,
    pub pass: SecretString,
    /// Display name placed in the `From` header
    pub from_name: Option<String>,
}

/// Chat-completions summarizer configuration
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub api_key: SecretString,
    /// API base without trailing slash (e.g. `https://api.openai.com/v1`)
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
}

/// Server-wide configuration
///
/// Cloned into MCP tool handlers and HTTP state via `Arc` for shared access.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub imap: ImapConfig,
    /// Present when `MAIL_DIGEST_SMTP_HOST` is set
    pub smtp: Option<SmtpConfig>,
    /// Present when an API key is configured
    pub summarizer: Option<SummarizerConfig>,
    /// Whether `send_email` is allowed
    pub send_enabled: bool,
    /// Reference zone used to render `local_time`
    pub timezone: Tz,
    /// Maximum characters in a body preview
    pub preview_chars: usize,
    /// Extra calendar days added on both sides of the coarse search
    pub search_margin_days: u32,
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// IMAP greeting/TLS handshake timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Socket I/O timeout in milliseconds
    pub socket_timeout_ms: u64,
    /// Listen address for the HTTP transport
    pub http_bind: String,
    /// Bearer key required on the HTTP surface when set
    pub api_key: Option<SecretString>,
}

impl ServerConfig {
    /// Load all configuration from process environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if required environment variables are missing
    /// or malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_DIGEST_IMAP_HOST=imap.strato.de
    /// MAIL_DIGEST_IMAP_USER=user@example.com
    /// MAIL_DIGEST_IMAP_PASS=app-password
    /// MAIL_DIGEST_SMTP_HOST=smtp.strato.de
    /// MAIL_DIGEST_SEND_ENABLED=true
    /// MAIL_DIGEST_OPENAI_API_KEY=sk-...
    /// MAIL_DIGEST_TIMEZONE=Europe/Berlin
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        Self::load_with(|key| env::var(key))
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn load_with<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let vars = EnvReader { lookup };

        let imap_user = vars.required("MAIL_DIGEST_IMAP_USER")?;
        let imap_pass = vars.required("MAIL_DIGEST_IMAP_PASS")?;
        let imap = ImapConfig {
            host: vars.required("MAIL_DIGEST_IMAP_HOST")?,
            port: vars.parse_or("MAIL_DIGEST_IMAP_PORT", 993)?,
            secure: vars.bool_or("MAIL_DIGEST_IMAP_SECURE", true)?,
            user: imap_user.clone(),
            pass: SecretString::new(imap_pass.clone().into()),
        };

        let smtp = match vars.optional("MAIL_DIGEST_SMTP_HOST")? {
            Some(host) => Some(SmtpConfig {
                host,
                port: vars.parse_or("MAIL_DIGEST_SMTP_PORT", 465)?,
                user: vars.optional("MAIL_DIGEST_SMTP_USER")?.unwrap_or(imap_user),
                pass: SecretString::new(
                    vars.optional("MAIL_DIGEST_SMTP_PASS")?
                        .unwrap_or(imap_pass)
                        .into(),
                ),
                from_name: vars.optional("MAIL_DIGEST_FROM_NAME")?,
            }),
            None => None,
        };

        let api_key = match vars.optional("MAIL_DIGEST_OPENAI_API_KEY")? {
            Some(key) => Some(key),
            None => vars.optional("OPENAI_API_KEY")?,
        };
        let summarizer = match api_key {
            Some(key) => Some(SummarizerConfig {
                api_key: SecretString::new(key.into()),
                base_url: vars
                    .optional("MAIL_DIGEST_OPENAI_BASE_URL")?
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_owned())
                    .trim_end_matches('/')
                    .to_owned(),
                model: vars
                    .optional("MAIL_DIGEST_OPENAI_MODEL")?
                    .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_owned()),
                timeout_ms: vars.parse_or("MAIL_DIGEST_SUMMARY_TIMEOUT_MS", 60_000)?,
            }),
            None => None,
        };

        let timezone_name = vars
            .optional("MAIL_DIGEST_TIMEZONE")?
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_owned());
        let timezone = timezone_name.parse::<Tz>().map_err(|_| {
            AppError::InvalidInput(format!(
                "invalid MAIL_DIGEST_TIMEZONE '{timezone_name}', expected an IANA zone name"
            ))
        })?;

        let preview_chars = vars.parse_or("MAIL_DIGEST_PREVIEW_CHARS", 200)?;
        if preview_chars == 0 {
            return Err(AppError::InvalidInput(
                "MAIL_DIGEST_PREVIEW_CHARS must be at least 1".to_owned(),
            ));
        }

        Ok(Self {
            imap,
            smtp,
            summarizer,
            send_enabled: vars.bool_or("MAIL_DIGEST_SEND_ENABLED", false)?,
            timezone,
            preview_chars,
            search_margin_days: vars.parse_or("MAIL_DIGEST_SEARCH_MARGIN_DAYS", 0)?,
            connect_timeout_ms: vars.parse_or("MAIL_DIGEST_CONNECT_TIMEOUT_MS", 30_000)?,
            greeting_timeout_ms: vars.parse_or("MAIL_DIGEST_GREETING_TIMEOUT_MS", 15_000)?,
            socket_timeout_ms: vars.parse_or("MAIL_DIGEST_SOCKET_TIMEOUT_MS", 300_000)?,
            http_bind: vars
                .optional("MAIL_DIGEST_HTTP_BIND")?
                .unwrap_or_else(|| "0.0.0.0:5001".to_owned()),
            api_key: vars
                .optional("MAIL_DIGEST_API_KEY")?
                .map(|k| SecretString::new(k.into())),
        })
    }
}

/// Typed accessors over a variable lookup
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    /// Read a variable, treating unset and blank values as absent
    fn optional(&self, key: &str) -> AppResult<Option<String>> {
        match (self.lookup)(key) {
            Ok(v) if v.trim().is_empty() => Ok(None),
            Ok(v) => Ok(Some(v)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
                "environment variable {key} contains non-unicode data"
            ))),
        }
    }

    /// Read a required variable, returning error if missing or empty
    fn required(&self, key: &str) -> AppResult<String> {
        self.optional(key)?.ok_or_else(|| {
            AppError::InvalidInput(format!("missing required environment variable {key}"))
        })
    }

    /// Parse a variable with default fallback
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the variable is set but does not parse.
    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> AppResult<T> {
        match self.optional(key)? {
            Some(v) => v.trim().parse::<T>().map_err(|_| {
                AppError::InvalidInput(format!("invalid environment variable {key}: '{v}'"))
            }),
            None => Ok(default),
        }
    }

    /// Parse a boolean variable with flexible values
    fn bool_or(&self, key: &str, default: bool) -> AppResult<bool> {
        match self.optional(key)? {
            Some(v) => parse_bool_value(&v).ok_or_else(|| {
                AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
            }),
            None => Ok(default),
        }
    }
}

/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive.
fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
impl ServerConfig {
    /// Minimal configuration for unit tests (no network is ever touched)
    pub(crate) fn sample() -> Self {
        Self::load_with(|key| match key {
            "MAIL_DIGEST_IMAP_HOST" => Ok("imap.example.com".to_owned()),
            "MAIL_DIGEST_IMAP_USER" => Ok("me@example.com".to_owned()),
            "MAIL_DIGEST_IMAP_PASS" => Ok("secret".to_owned()),
            "MAIL_DIGEST_SMTP_HOST" => Ok("smtp.example.com".to_owned()),
            "MAIL_DIGEST_FROM_NAME" => Ok("Frank Example".to_owned()),
            _ => Err(VarError::NotPresent),
        })
        .expect("sample config must load")
    }
}
