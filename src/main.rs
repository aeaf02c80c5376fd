//! mail-digest-mcp: time-window email digest over MCP and HTTP
//!
//! Reads an IMAP inbox by UTC time window, optionally summarizes the result
//! with an OpenAI-compatible model, and sends mail over SMTP. Tools are served
//! over MCP stdio or over HTTP (REST, OpenAPI, and streamable MCP).
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and transport selection
//! - [`config`]: Environment-driven configuration
//! - [`errors`]: Application error model with MCP and HTTP error mapping
//! - [`window`]: Time-window retrieval and normalization pipeline
//! - [`mime`]: Header decoding, date parsing, and body previews
//! - [`imap`]: IMAP transport/session operations with timeout wrappers
//! - [`summarize`]: Summarizer trait and chat-completions client
//! - [`smtp`]: Outbound message construction and submission
//! - [`digest`]: Orchestration shared by both transports
//! - [`models`]: Input/output DTOs and schema-bearing types
//! - [`server`]: MCP tool handlers
//! - [`http`]: REST, OpenAPI, and streamable MCP over axum

mod config;
mod digest;
mod errors;
mod http;
mod imap;
mod mime;
mod models;
mod server;
mod smtp;
mod summarize;
mod window;

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use config::ServerConfig;
use digest::MailDigestService;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Transport the tools are served over
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// MCP over stdin/stdout, for clients that spawn the process
    Stdio,
    /// REST, OpenAPI, and streamable MCP over HTTP
    Http,
}

#[derive(Debug, Parser)]
#[command(version, about = "Read, summarize, and send email by UTC time window")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,
    /// HTTP listen address (overrides MAIL_DIGEST_HTTP_BIND)
    #[arg(long)]
    bind: Option<String>,
}

/// Application entry point
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_DIGEST_IMAP_HOST=imap.example.com \
/// MAIL_DIGEST_IMAP_USER=user@example.com \
/// MAIL_DIGEST_IMAP_PASS=secret \
/// cargo run -- --transport http
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(ServerConfig::load_from_env()?);
    let service = MailDigestService::new(Arc::clone(&config))?;

    match cli.transport {
        Transport::Stdio => {
            info!("serving MCP over stdio");
            let running = server::MailDigestServer::new(service)
                .serve(stdio())
                .await?;
            running.waiting().await?;
        }
        Transport::Http => {
            let bind = cli.bind.unwrap_or_else(|| config.http_bind.clone());
            let shutdown = CancellationToken::new();
            let on_signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown signal received");
                }
                on_signal.cancel();
            });
            http::serve(service, &bind, shutdown).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Transport};

    #[test]
    fn defaults_to_stdio() {
        let cli = Cli::parse_from(["mail-digest-mcp"]);
        assert_eq!(cli.transport, Transport::Stdio);
        assert!(cli.bind.is_none());
    }

    #[test]
    fn parses_http_transport_with_bind() {
        let cli = Cli::parse_from(["mail-digest-mcp", "--transport", "http", "--bind", "127.0.0.1:8080"]);
        assert_eq!(cli.transport, Transport::Http);
        assert_eq!(cli.bind.as_deref(), Some("127.0.0.1:8080"));
    }
}
