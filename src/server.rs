//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers the three digest tools.
//! Business logic lives in [`MailDigestService`]; handlers only time the call
//! and wrap the outcome in a [`ToolEnvelope`].

use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use tracing::info;

use crate::digest::MailDigestService;
use crate::errors::AppResult;
use crate::models::{
    EmailDigest, Meta, SendEmailInput, SendEmailResult, TimeRangeInput, ToolEnvelope,
};

/// Mail digest MCP server
///
/// Cheap to clone; the HTTP transport builds one per MCP session.
#[derive(Clone)]
pub struct MailDigestServer {
    service: MailDigestService,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl MailDigestServer {
    pub fn new(service: MailDigestService) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: fetch emails in a UTC window and summarize them
    #[tool(
        name = "summarize_emails",
        description = "Fetch emails received between start_iso and end_iso (ISO 8601 UTC, inclusive) and summarize them with an LLM"
    )]
    async fn summarize_emails(
        &self,
        Parameters(input): Parameters<TimeRangeInput>,
    ) -> Result<Json<ToolEnvelope<EmailDigest>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.service
                .summarize_emails(&input)
                .await
                .map(|digest| (digest_summary(&digest), digest)),
        )
    }

    /// Tool: fetch emails in a UTC window without summarizing
    #[tool(
        name = "read_emails",
        description = "Read emails received between start_iso and end_iso (ISO 8601 UTC, inclusive), ordered oldest first"
    )]
    async fn read_emails(
        &self,
        Parameters(input): Parameters<TimeRangeInput>,
    ) -> Result<Json<ToolEnvelope<EmailDigest>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.service
                .read_emails(&input)
                .await
                .map(|digest| (digest_summary(&digest), digest)),
        )
    }

    /// Tool: send an email (requires MAIL_DIGEST_SEND_ENABLED=true)
    #[tool(
        name = "send_email",
        description = "Send an email via SMTP; requires MAIL_DIGEST_SEND_ENABLED=true"
    )]
    async fn send_email(
        &self,
        Parameters(input): Parameters<SendEmailInput>,
    ) -> Result<Json<ToolEnvelope<SendEmailResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.service.send_email(&input).await.map(|result| {
                let total =
                    result.recipients.to.len() + result.recipients.cc.len() + result.recipients.bcc.len();
                (format!("Email sent to {total} recipient(s)"), result)
            }),
        )
    }
}

/// MCP server handler implementation
#[tool_handler(router = self.tool_router)]
impl ServerHandler for MailDigestServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Mail digest MCP server. Read and summarize emails by UTC time window; send_email requires MAIL_DIGEST_SEND_ENABLED=true.",
        )
    }
}

/// One-line outcome for the envelope
pub(crate) fn digest_summary(digest: &EmailDigest) -> String {
    let mut summary = format!("{} email(s) in window", digest.email_count);
    if digest.skipped_count > 0 {
        summary.push_str(&format!(", {} skipped", digest.skipped_count));
    }
    if digest.summary_error.is_some() {
        summary.push_str(", summary unavailable");
    }
    summary
}

/// Calculate elapsed milliseconds
pub(crate) fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    let duration_ms = duration_ms(started);
    match result {
        Ok((summary, data)) => {
            info!(duration_ms, outcome = %summary, "tool call succeeded");
            Ok(Json(ToolEnvelope {
                summary,
                data,
                meta: Meta::now(duration_ms),
            }))
        }
        Err(e) => {
            info!(duration_ms, code = e.code(), error = %e, "tool call failed");
            Err(e.to_error_data())
        }
    }
}
