//! LLM summarization of fetched emails
//!
//! [`Summarizer`] is the seam the digest service calls at most once per
//! request. [`OpenAiSummarizer`] speaks the OpenAI-compatible
//! chat-completions protocol over `reqwest`.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::SummarizerConfig;
use crate::errors::{AppError, AppResult};
use crate::models::EmailRecord;

/// Returned for an empty window without calling the model
pub const NO_EMAILS_SUMMARY: &str = "No emails found in the specified time range.";

const SYSTEM_PROMPT: &str = "You are an email summarization assistant. Give a concise summary \
of the emails, highlighting key senders, topics, and action items.";

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 500;

/// Produces a natural-language summary of a list of records
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `emails`, which are already ordered by time
    ///
    /// # Errors
    ///
    /// `Summary` when the collaborator fails or returns no usable text.
    async fn summarize(&self, emails: &[EmailRecord]) -> AppResult<String>;
}

/// Render the user prompt for a non-empty list of records
pub fn build_prompt(emails: &[EmailRecord]) -> String {
    let mut prompt = format!("Please summarize these {} emails:\n\n", emails.len());
    for (i, email) in emails.iter().enumerate() {
        let _ = write!(
            prompt,
            "Email {}:\nFrom: {}\nSubject: {}\nDate: {}\nPreview: {}\n---\n\n",
            i + 1,
            email.from,
            email.subject,
            email.local_time,
            if email.body_preview.is_empty() {
                "(no preview)"
            } else {
                email.body_preview.as_str()
            }
        );
    }
    prompt
}

/// Chat-completions client for OpenAI and compatible APIs
pub struct OpenAiSummarizer {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
}

impl OpenAiSummarizer {
    /// Build a client with the configured timeout
    ///
    /// # Errors
    ///
    /// `Internal` if the HTTP client cannot be constructed.
    pub fn new(config: &SummarizerConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Pull the first choice's text out of a completion
fn first_choice_text(completion: ChatCompletion) -> AppResult<String> {
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| AppError::Summary("model returned no summary text".to_owned()))
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, emails: &[EmailRecord]) -> AppResult<String> {
        if emails.is_empty() {
            return Ok(NO_EMAILS_SUMMARY.to_owned());
        }

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(emails) },
            ],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        });

        debug!(model = %self.model, emails = emails.len(), "requesting summary");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("summary request timed out: {e}"))
                } else {
                    AppError::Summary(format!("summary request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail: String = text.chars().take(200).collect();
            return Err(AppError::Summary(format!(
                "summary API returned {status}: {detail}"
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| AppError::Summary(format!("invalid summary response: {e}")))?;
        first_choice_text(completion)
    }
}
