//! Input/output DTOs and schema-bearing types
//!
//! Defines the data structures used by the MCP tools and the REST surface.
//! Each type is annotated with `JsonSchema` so both surfaces publish the same
//! contract.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::window::SkippedMessage;

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Input: UTC time window
///
/// Used by `summarize_emails` and `read_emails`. Both bounds are inclusive.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TimeRangeInput {
    /// Window start, ISO 8601 in UTC (e.g. `2024-06-05T00:00:00Z`)
    pub start_iso: String,
    /// Window end, ISO 8601 in UTC (e.g. `2024-06-05T23:59:59Z`)
    pub end_iso: String,
}

/// Caller's window echoed back verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimeRangeEcho {
    pub start: String,
    pub end: String,
}

impl From<&TimeRangeInput> for TimeRangeEcho {
    fn from(input: &TimeRangeInput) -> Self {
        Self {
            start: input.start_iso.clone(),
            end: input.end_iso.clone(),
        }
    }
}

/// One message, normalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EmailRecord {
    /// Decoded From header
    pub from: String,
    /// Decoded Subject header
    pub subject: String,
    /// Date header exactly as sent
    pub date: String,
    /// Date header as RFC 3339 with the sender's offset
    pub original_date: String,
    /// Same instant in the configured reference zone, RFC 3339
    pub local_time: String,
    /// Epoch seconds
    pub utc_timestamp: f64,
    /// Leading characters of the plain-text body
    pub body_preview: String,
}

/// Result of `read_emails` and `summarize_emails`
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct EmailDigest {
    pub time_range: TimeRangeEcho,
    pub email_count: usize,
    /// Records ordered by `utc_timestamp` ascending
    pub emails: Vec<EmailRecord>,
    /// Candidates that could not be read or dated
    pub skipped_count: usize,
    pub skipped: Vec<SkippedMessage>,
    /// Candidates from the coarse day search dated outside the exact window
    pub filtered_count: usize,
    /// LLM summary; null for `read_emails` or when summarization failed
    pub summary: Option<String>,
    /// Why `summary` is null, when summarization was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_error: Option<String>,
}

/// Body content type for outgoing mail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    #[default]
    Plain,
    Html,
}

/// Input: send an email
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendEmailInput {
    /// Recipient addresses (at least one)
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Carbon-copy recipients
    #[serde(default)]
    pub cc: Vec<String>,
    /// Blind carbon-copy recipients; never written to headers
    #[serde(default)]
    pub bcc: Vec<String>,
    /// `plain` (default) or `html`
    #[serde(default)]
    pub body_type: BodyType,
}

/// Recipient lists as accepted for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Recipients {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

/// Result of `send_email`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendEmailResult {
    /// Always `sent` on success
    pub status: String,
    pub recipients: Recipients,
    pub subject: String,
    /// Submission time in the reference zone, RFC 3339
    pub sent_at: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{BodyType, SendEmailInput, TimeRangeEcho, TimeRangeInput};

    #[test]
    fn send_input_defaults_optional_fields() {
        let input: SendEmailInput = serde_json::from_value(json!({
            "to": ["a@example.com"],
            "subject": "Hi",
            "body": "Hello"
        }))
        .expect("valid input");
        assert!(input.cc.is_empty());
        assert!(input.bcc.is_empty());
        assert_eq!(input.body_type, BodyType::Plain);

        let html: SendEmailInput = serde_json::from_value(json!({
            "to": ["a@example.com"],
            "subject": "Hi",
            "body": "<p>Hello</p>",
            "body_type": "html"
        }))
        .expect("valid input");
        assert_eq!(html.body_type, BodyType::Html);
    }

    #[test]
    fn unknown_body_type_is_rejected() {
        let result: Result<SendEmailInput, _> = serde_json::from_value(json!({
            "to": ["a@example.com"],
            "subject": "Hi",
            "body": "Hello",
            "body_type": "markdown"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn time_range_is_echoed_verbatim() {
        let input = TimeRangeInput {
            start_iso: "2024-06-05T00:00:00Z".to_owned(),
            end_iso: "2024-06-05T23:59:59Z".to_owned(),
        };
        let echo = TimeRangeEcho::from(&input);
        assert_eq!(echo.start, "2024-06-05T00:00:00Z");
        assert_eq!(echo.end, "2024-06-05T23:59:59Z");
    }
}
