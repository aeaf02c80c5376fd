//! Orchestration of fetch, summarize, and send
//!
//! [`MailDigestService`] owns the configuration and the optional summarizer.
//! Every call opens its own IMAP session and releases it on all exit paths.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::imap::ImapMailbox;
use crate::models::{EmailDigest, SendEmailInput, SendEmailResult, TimeRangeEcho, TimeRangeInput};
use crate::smtp;
use crate::summarize::{OpenAiSummarizer, Summarizer};
use crate::window::{FetchOptions, TimeWindow, WindowFetch, fetch_window};

/// Explanation used when no summarizer is configured
pub const SUMMARIZER_NOT_CONFIGURED: &str =
    "summarization is not configured; set MAIL_DIGEST_OPENAI_API_KEY";

/// Whether and how to summarize a fetch
#[derive(Clone, Copy)]
pub enum SummaryMode<'a> {
    /// `read_emails`: no summary requested
    Skip,
    /// Summary requested but no summarizer is available
    Unconfigured,
    /// Summary requested and available
    With(&'a dyn Summarizer),
}

/// Digest service shared by the MCP and HTTP surfaces
#[derive(Clone)]
pub struct MailDigestService {
    config: Arc<ServerConfig>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl MailDigestService {
    /// Build the service, creating the chat-completions client when configured
    ///
    /// # Errors
    ///
    /// `Internal` if the HTTP client for the summarizer cannot be built.
    pub fn new(config: Arc<ServerConfig>) -> AppResult<Self> {
        let summarizer = match &config.summarizer {
            Some(cfg) => Some(Arc::new(OpenAiSummarizer::new(cfg)?) as Arc<dyn Summarizer>),
            None => None,
        };
        Ok(Self::with_summarizer(config, summarizer))
    }

    /// Build the service around an explicit summarizer
    pub fn with_summarizer(
        config: Arc<ServerConfig>,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Self {
        Self { config, summarizer }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timezone: self.config.timezone,
            preview_chars: self.config.preview_chars,
            search_margin_days: self.config.search_margin_days,
        }
    }

    fn summary_mode(&self) -> SummaryMode<'_> {
        match &self.summarizer {
            Some(s) => SummaryMode::With(s.as_ref()),
            None => SummaryMode::Unconfigured,
        }
    }

    /// Fetch the window without summarizing
    pub async fn read_emails(&self, input: &TimeRangeInput) -> AppResult<EmailDigest> {
        self.run(input, SummaryMode::Skip).await
    }

    /// Fetch the window and summarize it
    pub async fn summarize_emails(&self, input: &TimeRangeInput) -> AppResult<EmailDigest> {
        self.run(input, self.summary_mode()).await
    }

    async fn run(&self, input: &TimeRangeInput, mode: SummaryMode<'_>) -> AppResult<EmailDigest> {
        // Reject bad windows before touching the network
        let window = TimeWindow::parse(&input.start_iso, &input.end_iso)?;

        let mut mailbox = ImapMailbox::connect(&self.config).await?;
        let fetched = fetch_window(&mut mailbox, &window, &self.fetch_options()).await;
        mailbox.close().await;

        Ok(build_digest(TimeRangeEcho::from(input), fetched?, mode).await)
    }

    /// Send one email through the configured relay
    ///
    /// # Errors
    ///
    /// - `Disabled` when sending is turned off or no SMTP host is configured
    /// - `InvalidInput` for malformed recipients or subject
    /// - `Send` when the relay rejects the message
    pub async fn send_email(&self, input: &SendEmailInput) -> AppResult<SendEmailResult> {
        if !self.config.send_enabled {
            return Err(AppError::Disabled(
                "sending is disabled; set MAIL_DIGEST_SEND_ENABLED=true".to_owned(),
            ));
        }
        let smtp_config = self.config.smtp.as_ref().ok_or_else(|| {
            AppError::Disabled("SMTP is not configured; set MAIL_DIGEST_SMTP_HOST".to_owned())
        })?;
        smtp::send_email(
            smtp_config,
            input,
            self.config.timezone,
            self.config.socket_timeout_ms,
        )
        .await
        .inspect_err(|e| warn!(error = %e, "send_email failed"))
    }
}

/// Assemble the boundary output from one fetch
///
/// The summarizer runs at most once. Its failure never discards the fetched
/// records: `summary` stays null and `summary_error` carries the message.
pub async fn build_digest(
    time_range: TimeRangeEcho,
    fetch: WindowFetch,
    mode: SummaryMode<'_>,
) -> EmailDigest {
    let (summary, summary_error) = match mode {
        SummaryMode::Skip => (None, None),
        SummaryMode::Unconfigured => (None, Some(SUMMARIZER_NOT_CONFIGURED.to_owned())),
        SummaryMode::With(summarizer) => match summarizer.summarize(&fetch.emails).await {
            Ok(text) => (Some(text), None),
            Err(e) => {
                warn!(error = %e, "summarization failed");
                (None, Some(e.to_string()))
            }
        },
    };

    info!(
        emails = fetch.emails.len(),
        skipped = fetch.skipped.len(),
        filtered = fetch.outside_window,
        summarized = summary.is_some(),
        "digest built"
    );
    EmailDigest {
        time_range,
        email_count: fetch.emails.len(),
        skipped_count: fetch.skipped.len(),
        emails: fetch.emails,
        skipped: fetch.skipped,
        filtered_count: fetch.outside_window,
        summary,
        summary_error,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::{MailDigestService, SUMMARIZER_NOT_CONFIGURED, SummaryMode, build_digest};
    use crate::config::ServerConfig;
    use crate::errors::{AppError, AppResult};
    use crate::models::{
        BodyType, EmailDigest, EmailRecord, SendEmailInput, TimeRangeEcho, TimeRangeInput,
    };
    use crate::summarize::{NO_EMAILS_SUMMARY, Summarizer};
    use crate::window::tests::FakeMailbox;
    use crate::window::{TimeWindow, fetch_window};

    /// Counts calls and reports how many emails it saw
    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, emails: &[EmailRecord]) -> AppResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if emails.is_empty() {
                return Ok(NO_EMAILS_SUMMARY.to_owned());
            }
            Ok(format!("{} emails", emails.len()))
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _emails: &[EmailRecord]) -> AppResult<String> {
            Err(AppError::Summary("upstream returned 503".to_owned()))
        }
    }

    fn june_5() -> TimeRangeInput {
        TimeRangeInput {
            start_iso: "2024-06-05T00:00:00Z".to_owned(),
            end_iso: "2024-06-05T23:59:59Z".to_owned(),
        }
    }

    fn service(summarizer: Option<Arc<dyn Summarizer>>) -> MailDigestService {
        MailDigestService::with_summarizer(Arc::new(ServerConfig::sample()), summarizer)
    }

    /// Same steps as `run`, over an in-memory mailbox
    async fn digest(
        svc: &MailDigestService,
        mailbox: &mut FakeMailbox,
        summarize: bool,
    ) -> EmailDigest {
        let input = june_5();
        let window = TimeWindow::parse(&input.start_iso, &input.end_iso).expect("valid window");
        let fetched = fetch_window(mailbox, &window, &svc.fetch_options())
            .await
            .expect("fetch succeeds");
        let mode = if summarize {
            svc.summary_mode()
        } else {
            SummaryMode::Skip
        };
        build_digest(TimeRangeEcho::from(&input), fetched, mode).await
    }

    fn mailbox() -> FakeMailbox {
        FakeMailbox::new()
            .with_message("Wed, 5 Jun 2024 10:30:00 +0200", "Standup", "Notes")
            .with_message("Wed, 5 Jun 2024 07:00:00 +0000", "Early", "Coffee")
    }

    #[tokio::test]
    async fn summarize_calls_summarizer_once_and_keeps_emails() {
        let counting = Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
        });
        let svc = service(Some(counting.clone()));
        let digest = digest(&svc, &mut mailbox(), true).await;

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(digest.email_count, 2);
        assert_eq!(digest.emails[0].subject, "Early");
        assert_eq!(digest.summary.as_deref(), Some("2 emails"));
        assert!(digest.summary_error.is_none());
        assert_eq!(digest.time_range.start, "2024-06-05T00:00:00Z");
    }

    #[tokio::test]
    async fn out_of_window_candidates_do_not_count_as_skipped() {
        let svc = service(None);
        // Listed under the searched day but dated the evening before
        let mut mailbox = mailbox().with_raw(
            NaiveDate::from_ymd_opt(2024, 6, 5).expect("valid date"),
            b"Subject: Late night\r\nDate: Tue, 4 Jun 2024 23:30:00 +0000\r\n\r\nx",
        );
        let digest = digest(&svc, &mut mailbox, false).await;

        assert_eq!(digest.email_count, 2);
        assert_eq!(digest.skipped_count, 0);
        assert!(digest.skipped.is_empty());
        assert_eq!(digest.filtered_count, 1);
    }

    #[tokio::test]
    async fn read_never_calls_summarizer() {
        let counting = Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
        });
        let svc = service(Some(counting.clone()));
        let digest = digest(&svc, &mut mailbox(), false).await;

        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
        assert!(digest.summary.is_none());
        assert!(digest.summary_error.is_none());
        assert_eq!(digest.email_count, 2);
    }

    #[tokio::test]
    async fn summarizer_failure_keeps_records() {
        let svc = service(Some(Arc::new(FailingSummarizer)));
        let digest = digest(&svc, &mut mailbox(), true).await;

        assert_eq!(digest.email_count, 2);
        assert!(digest.summary.is_none());
        assert!(
            digest
                .summary_error
                .as_deref()
                .is_some_and(|e| e.contains("503"))
        );
    }

    #[tokio::test]
    async fn missing_summarizer_is_reported() {
        let svc = service(None);
        let digest = digest(&svc, &mut mailbox(), true).await;
        assert!(digest.summary.is_none());
        assert_eq!(digest.summary_error.as_deref(), Some(SUMMARIZER_NOT_CONFIGURED));
    }

    #[tokio::test]
    async fn empty_window_yields_no_emails_summary() {
        let svc = service(Some(Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
        })));
        let digest = digest(&svc, &mut FakeMailbox::new(), true).await;

        assert_eq!(digest.email_count, 0);
        assert!(digest.emails.is_empty());
        assert_eq!(digest.summary.as_deref(), Some(NO_EMAILS_SUMMARY));
    }

    #[tokio::test]
    async fn invalid_window_fails_before_connecting() {
        let svc = service(None);
        let input = TimeRangeInput {
            start_iso: "2024-06-06T00:00:00Z".to_owned(),
            end_iso: "2024-06-05T00:00:00Z".to_owned(),
        };
        let err = svc
            .read_emails(&input)
            .await
            .expect_err("reversed window must fail");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn send_is_gated_by_configuration() {
        let input = SendEmailInput {
            to: vec!["alice@example.com".to_owned()],
            subject: "Hi".to_owned(),
            body: "Hello".to_owned(),
            cc: Vec::new(),
            bcc: Vec::new(),
            body_type: BodyType::Plain,
        };

        let disabled = service(None);
        assert!(matches!(
            disabled.send_email(&input).await,
            Err(AppError::Disabled(_))
        ));

        let mut config = ServerConfig::sample();
        config.send_enabled = true;
        config.smtp = None;
        let no_smtp = MailDigestService::with_summarizer(Arc::new(config), None);
        assert!(matches!(
            no_smtp.send_email(&input).await,
            Err(AppError::Disabled(_))
        ));
    }
}
