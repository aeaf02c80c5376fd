//! Message parsing and MIME handling
//!
//! Parses RFC822 messages using `mailparse` with tolerant decoding: encoded
//! headers are decoded, undecodable header bytes fall back to lossy UTF-8,
//! and body previews prefer `text/plain` with `html2text` rendering for
//! HTML-only messages.

use chrono::{DateTime, FixedOffset, Utc};
use mailparse::{DispositionType, MailHeader, MailHeaderMap, ParsedMail};

/// Wrap width handed to `html2text`; previews collapse line breaks anyway
const HTML_RENDER_WIDTH: usize = 400;

/// Headers and body preview extracted from one message
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Decoded From header
    pub from: Option<String>,
    /// Decoded Subject header
    pub subject: Option<String>,
    /// Date header text as found in the message
    pub date: Option<String>,
    /// Plain-text preview, empty when the body could not be decoded
    pub body_preview: String,
}

/// Parse RFC822 message into headers and a bounded body preview
///
/// # Errors
///
/// Returns the `mailparse` error text when the message structure itself
/// cannot be parsed.
pub fn parse_message(raw: &[u8], preview_chars: usize) -> Result<ParsedMessage, String> {
    let parsed =
        mailparse::parse_mail(raw).map_err(|e| format!("failed to parse RFC822 message: {e}"))?;

    Ok(ParsedMessage {
        from: parsed.headers.get_first_header("From").map(decode_header),
        subject: parsed.headers.get_first_header("Subject").map(decode_header),
        date: parsed
            .headers
            .get_first_header("Date")
            .map(decode_header)
            .filter(|d| !d.is_empty()),
        body_preview: body_preview(&parsed, preview_chars),
    })
}

/// Decode a header value, tolerating broken encodings
///
/// RFC 2047 encoded words are decoded when the raw bytes are valid UTF-8.
/// Otherwise the raw bytes are interpreted as UTF-8 with replacement
/// characters rather than failing the whole record.
pub fn decode_header(header: &MailHeader<'_>) -> String {
    let decoded = header
        .get_value_utf8()
        .unwrap_or_else(|_| String::from_utf8_lossy(header.get_value_raw()).into_owned());
    collapse_whitespace(&decoded)
}

/// Parse a `Date` header into an instant with its stated offset
///
/// Tries strict RFC 2822 first, then RFC 2822 with a trailing zone comment
/// such as `(CEST)` removed, then the lenient `mailparse` parser (which loses
/// the offset and yields UTC). The lenient parser returns epoch 0 for text it
/// cannot read, so its result is only trusted when the value names a day, a
/// month and a four-digit year.
pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt);
    }

    if let Some(without_comment) = strip_trailing_comment(trimmed)
        && let Ok(dt) = DateTime::parse_from_rfc2822(without_comment)
    {
        return Some(dt);
    }

    if !has_calendar_date(trimmed) {
        return None;
    }
    let epoch = mailparse::dateparse(trimmed).ok()?;
    DateTime::<Utc>::from_timestamp(epoch, 0).map(|dt| dt.fixed_offset())
}

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

/// Whether `value` contains a day of month, a month name, and a 4-digit year
fn has_calendar_date(value: &str) -> bool {
    let tokens: Vec<String> = value
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();

    let is_numeric = |t: &str| t.bytes().all(|b| b.is_ascii_digit());
    let has_day = tokens
        .iter()
        .any(|t| t.len() <= 2 && is_numeric(t) && matches!(t.parse::<u8>(), Ok(1..=31)));
    let has_year = tokens.iter().any(|t| t.len() == 4 && is_numeric(t));
    let has_month = tokens
        .iter()
        .any(|t| t.len() >= 3 && MONTHS.iter().any(|m| m.starts_with(t.as_str())));
    has_day && has_year && has_month
}

/// Remove a trailing `(comment)` from a header value
fn strip_trailing_comment(value: &str) -> Option<&str> {
    let body = value.strip_suffix(')')?;
    let open = body.rfind('(')?;
    Some(body[..open].trim_end())
}

/// Extract a plain-text preview from the message body
///
/// Prefers the first inline `text/plain` part with content. Falls back to the
/// first inline `text/html` part rendered as text. Decoding failures yield an
/// empty preview.
fn body_preview(parsed: &ParsedMail<'_>, preview_chars: usize) -> String {
    let plain = find_inline_part(parsed, "text/plain")
        .map(|part| part.get_body().unwrap_or_default())
        .filter(|text| !text.trim().is_empty());
    let text = plain
        .or_else(|| {
            find_inline_part(parsed, "text/html")
                .and_then(|part| part.get_body().ok())
                .and_then(|html| html2text::from_read(html.as_bytes(), HTML_RENDER_WIDTH).ok())
        })
        .unwrap_or_default();

    truncate_chars(collapse_whitespace(&text), preview_chars)
}

/// Depth-first search for the first non-attachment leaf with `mimetype`
fn find_inline_part<'a>(part: &'a ParsedMail<'a>, mimetype: &str) -> Option<&'a ParsedMail<'a>> {
    if part.subparts.is_empty() {
        let is_attachment = part.get_content_disposition().disposition
            == DispositionType::Attachment;
        let matches = part.ctype.mimetype.eq_ignore_ascii_case(mimetype);
        return (matches && !is_attachment).then_some(part);
    }

    part.subparts
        .iter()
        .find_map(|sub| find_inline_part(sub, mimetype))
}

/// Collapse whitespace runs (including folded header lines) to single spaces
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate string to maximum characters (Unicode-aware)
///
/// Preserves complete characters, never splitting multi-byte sequences.
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input;
    }
    input.chars().take(max_chars).collect()
}
