//! Time-window email retrieval and normalization
//!
//! Turns a UTC time window into a day-granular mailbox search, fetches every
//! candidate, and normalizes the survivors. IMAP `SINCE`/`BEFORE` only
//! understand calendar days, so the server predicate over-selects and
//! [`TimeWindow::contains`] removes the excess.
//!
//! Per-message problems never fail the fetch. Each candidate becomes a
//! [`MessageOutcome`], and skipped messages are reported alongside the kept
//! records. Candidates dated outside the exact window are only counted.

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::mime;
use crate::models::EmailRecord;

/// Folder searched by the fetcher
pub const INBOX: &str = "INBOX";

/// Inclusive UTC time window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window, rejecting `start > end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<Self> {
        if start > end {
            return Err(AppError::InvalidInput(format!(
                "start_iso ({}) must not be after end_iso ({})",
                start.to_rfc3339_opts(SecondsFormat::Secs, true),
                end.to_rfc3339_opts(SecondsFormat::Secs, true)
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a window from two RFC 3339 timestamps
    ///
    /// `Z` is the expected designator; explicit offsets are accepted and
    /// normalized to UTC.
    pub fn parse(start_iso: &str, end_iso: &str) -> AppResult<Self> {
        let start = parse_instant(start_iso, "start_iso")?;
        let end = parse_instant(end_iso, "end_iso")?;
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Exact client-side predicate, inclusive on both bounds
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

fn parse_instant(value: &str, field: &str) -> AppResult<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput(format!("{field} is required")));
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            AppError::InvalidInput(format!(
                "invalid {field} '{value}', expected ISO 8601 UTC like 2024-06-05T00:00:00Z"
            ))
        })
}

/// Calendar-day range used for the coarse server-side search
///
/// Covers `[first, last_exclusive)`, clamped to the years IMAP can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub first: NaiveDate,
    pub last_exclusive: NaiveDate,
}

impl DayRange {
    /// Smallest day range containing the window, widened by `margin_days`
    /// on each side
    pub fn covering(window: &TimeWindow, margin_days: u32) -> Self {
        let margin = Days::new(u64::from(margin_days));
        let (earliest, latest) = imap_date_bounds();
        let first = window
            .start
            .date_naive()
            .checked_sub_days(margin)
            .map_or(earliest, |d| d.clamp(earliest, latest));
        let last_exclusive = window
            .end
            .date_naive()
            .checked_add_days(margin)
            .and_then(|d| d.succ_opt())
            .map_or(latest, |d| d.clamp(earliest, latest));
        Self {
            first,
            last_exclusive,
        }
    }

    /// IMAP SEARCH criteria, e.g. `SINCE 5-Jun-2024 BEFORE 6-Jun-2024`
    pub fn to_imap_query(&self) -> String {
        format!(
            "SINCE {} BEFORE {}",
            imap_date(self.first),
            imap_date(self.last_exclusive)
        )
    }
}

/// First and last day with a four-digit year
fn imap_date_bounds() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN),
        NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX),
    )
}

/// Format date as IMAP SEARCH date (e.g., "1-Jan-2025")
fn imap_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}

/// Mailbox capability borrowed by the fetcher for one call
///
/// Implementations own the connection; the fetcher never opens or closes it.
#[async_trait]
pub trait MailboxSession: Send {
    /// Open `mailbox` read-only
    async fn select(&mut self, mailbox: &str) -> AppResult<()>;

    /// Coarse search; identifiers are returned in server order
    async fn search(&mut self, range: &DayRange) -> AppResult<Vec<u32>>;

    /// Full RFC822 source of one message, without marking it read
    async fn fetch_message(&mut self, id: u32) -> AppResult<Vec<u8>>;
}

/// Knobs for normalization
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Reference zone for `local_time`
    pub timezone: Tz,
    /// Maximum body preview characters
    pub preview_chars: usize,
    /// Extra days on both sides of the coarse search
    pub search_margin_days: u32,
}

/// Why a candidate message is absent from the result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// The per-message fetch failed
    FetchFailed(String),
    /// The message structure could not be parsed
    Unparseable(String),
    /// No `Date` header
    MissingDate,
    /// `Date` header present but not a recognizable date
    InvalidDate(String),
}

/// Result of normalizing one candidate
#[derive(Debug, Clone)]
pub enum MessageOutcome {
    Keep(EmailRecord),
    /// Readable, but dated outside the exact window
    OutsideWindow,
    Skip(SkipReason),
}

/// A candidate that did not make it into the result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct SkippedMessage {
    /// Server-assigned identifier
    pub id: u32,
    pub reason: SkipReason,
}

/// Output of one fetch call
#[derive(Debug, Clone, Default)]
pub struct WindowFetch {
    /// Normalized records, ascending by `utc_timestamp`
    pub emails: Vec<EmailRecord>,
    pub skipped: Vec<SkippedMessage>,
    /// Coarse-search candidates dropped by the exact filter
    pub outside_window: usize,
}

/// Fetch and normalize every message dated inside `window`
///
/// Selects [`INBOX`], runs one coarse day-range search, fetches candidates
/// sequentially in server order, and returns the survivors sorted by
/// `utc_timestamp` (stable for equal timestamps).
///
/// # Errors
///
/// Selection and search failures propagate. Per-message failures are
/// reported in [`WindowFetch::skipped`].
pub async fn fetch_window<M>(
    session: &mut M,
    window: &TimeWindow,
    options: &FetchOptions,
) -> AppResult<WindowFetch>
where
    M: MailboxSession + ?Sized,
{
    session.select(INBOX).await?;

    let range = DayRange::covering(window, options.search_margin_days);
    let ids = session.search(&range).await?;
    debug!(query = %range.to_imap_query(), candidates = ids.len(), "coarse search complete");

    let mut result = WindowFetch::default();
    for id in ids {
        let outcome = match session.fetch_message(id).await {
            Ok(raw) => normalize_message(&raw, window, options),
            Err(e) => MessageOutcome::Skip(SkipReason::FetchFailed(e.to_string())),
        };
        match outcome {
            MessageOutcome::Keep(record) => result.emails.push(record),
            MessageOutcome::OutsideWindow => result.outside_window += 1,
            MessageOutcome::Skip(reason) => {
                debug!(id, reason = ?reason, "message skipped");
                result.skipped.push(SkippedMessage { id, reason });
            }
        }
    }

    result
        .emails
        .sort_by(|a, b| a.utc_timestamp.total_cmp(&b.utc_timestamp));

    info!(
        start = %window.start().to_rfc3339_opts(SecondsFormat::Secs, true),
        end = %window.end().to_rfc3339_opts(SecondsFormat::Secs, true),
        kept = result.emails.len(),
        skipped = result.skipped.len(),
        outside_window = result.outside_window,
        "window fetch complete"
    );
    Ok(result)
}

/// Normalize one raw message against the window
pub fn normalize_message(raw: &[u8], window: &TimeWindow, options: &FetchOptions) -> MessageOutcome {
    let parsed = match mime::parse_message(raw, options.preview_chars) {
        Ok(parsed) => parsed,
        Err(e) => return MessageOutcome::Skip(SkipReason::Unparseable(e)),
    };

    let Some(date_header) = parsed.date else {
        return MessageOutcome::Skip(SkipReason::MissingDate);
    };
    let Some(original) = mime::parse_date(&date_header) else {
        return MessageOutcome::Skip(SkipReason::InvalidDate(date_header));
    };

    let instant = original.with_timezone(&Utc);
    if !window.contains(instant) {
        return MessageOutcome::OutsideWindow;
    }

    MessageOutcome::Keep(EmailRecord {
        from: parsed
            .from
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "(unknown sender)".to_owned()),
        subject: parsed
            .subject
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "(no subject)".to_owned()),
        original_date: original.to_rfc3339_opts(SecondsFormat::Secs, false),
        local_time: instant
            .with_timezone(&options.timezone)
            .to_rfc3339_opts(SecondsFormat::Secs, false),
        utc_timestamp: epoch_seconds(instant),
        date: date_header,
        body_preview: parsed.body_preview,
    })
}

/// Epoch seconds as a float, keeping sub-second precision when present
fn epoch_seconds(instant: DateTime<Utc>) -> f64 {
    instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_nanos()) / 1e9
}
