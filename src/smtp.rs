//! Outbound mail over SMTP
//!
//! Builds a single-part message with `lettre` and submits it through an
//! authenticated relay. Port 465 uses implicit TLS, every other port
//! STARTTLS.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use chrono_tz::Tz;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::SmtpConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{BodyType, Recipients, SendEmailInput, SendEmailResult};

/// Port that selects implicit TLS
const IMPLICIT_TLS_PORT: u16 = 465;

/// Parse one recipient, naming the field in the error
fn parse_mailbox(value: &str, field: &str) -> AppResult<Mailbox> {
    value
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| AppError::InvalidInput(format!("invalid {field} address '{value}': {e}")))
}

fn validate_subject(subject: &str) -> AppResult<()> {
    if subject.trim().is_empty() {
        return Err(AppError::invalid("subject must not be empty"));
    }
    if subject.chars().any(char::is_control) {
        return Err(AppError::invalid("subject must not contain control characters"));
    }
    Ok(())
}

/// Sender mailbox: display name (if configured) plus the SMTP login
fn sender(config: &SmtpConfig) -> AppResult<Mailbox> {
    let address = config.user.parse().map_err(|e| {
        AppError::Internal(format!(
            "SMTP user '{}' is not a usable sender address: {e}",
            config.user
        ))
    })?;
    Ok(Mailbox::new(config.from_name.clone(), address))
}

/// Validate input and build the outgoing message
///
/// Bcc recipients end up in the envelope only; `lettre` strips the header
/// when formatting.
///
/// # Errors
///
/// `InvalidInput` for an empty recipient list, an unparsable address, or a
/// subject containing control characters.
pub fn build_message(config: &SmtpConfig, input: &SendEmailInput) -> AppResult<Message> {
    if input.to.is_empty() {
        return Err(AppError::invalid("at least one 'to' recipient is required"));
    }
    validate_subject(&input.subject)?;

    let mut builder = Message::builder()
        .from(sender(config)?)
        .subject(input.subject.clone());
    for to in &input.to {
        builder = builder.to(parse_mailbox(to, "to")?);
    }
    for cc in &input.cc {
        builder = builder.cc(parse_mailbox(cc, "cc")?);
    }
    for bcc in &input.bcc {
        builder = builder.bcc(parse_mailbox(bcc, "bcc")?);
    }

    let content_type = match input.body_type {
        BodyType::Plain => ContentType::TEXT_PLAIN,
        BodyType::Html => ContentType::TEXT_HTML,
    };
    builder
        .header(content_type)
        .body(input.body.clone())
        .map_err(|e| AppError::InvalidInput(format!("cannot build message: {e}")))
}

/// Submit a message through the configured relay
///
/// # Errors
///
/// `Send` when the relay cannot be reached or rejects the message.
pub async fn submit(config: &SmtpConfig, message: Message, timeout_ms: u64) -> AppResult<()> {
    let builder = if config.port == IMPLICIT_TLS_PORT {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
    }
    .map_err(|e| AppError::Send(format!("invalid SMTP relay '{}': {e}", config.host)))?;

    let transport = builder
        .port(config.port)
        .credentials(Credentials::new(
            config.user.clone(),
            config.pass.expose_secret().to_owned(),
        ))
        .timeout(Some(Duration::from_millis(timeout_ms)))
        .build();

    transport
        .send(message)
        .await
        .map_err(|e| AppError::Send(e.to_string()))?;
    Ok(())
}

/// Build, submit, and describe one outgoing email
pub async fn send_email(
    config: &SmtpConfig,
    input: &SendEmailInput,
    timezone: Tz,
    timeout_ms: u64,
) -> AppResult<SendEmailResult> {
    let message = build_message(config, input)?;
    submit(config, message, timeout_ms).await?;

    let recipients = Recipients {
        to: input.to.clone(),
        cc: input.cc.clone(),
        bcc: input.bcc.clone(),
    };
    info!(
        to = recipients.to.len(),
        cc = recipients.cc.len(),
        bcc = recipients.bcc.len(),
        "email sent"
    );
    Ok(SendEmailResult {
        status: "sent".to_owned(),
        recipients,
        subject: input.subject.clone(),
        sent_at: Utc::now()
            .with_timezone(&timezone)
            .to_rfc3339_opts(SecondsFormat::Secs, false),
    })
}
