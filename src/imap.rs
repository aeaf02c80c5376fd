//! IMAP transport and session operations
//!
//! Provides timeout-bounded wrappers around `async-imap` operations. All network
//! calls are enforced to use TLS, and timeouts are derived from server config.
//! [`ImapMailbox`] adapts an authenticated session to the read-only
//! [`MailboxSession`] capability used by the window fetcher.

use std::sync::Arc;
use std::time::Duration;

use async_imap::types::Fetch;
use async_imap::{Client, Session};
use async_trait::async_trait;
use futures::TryStreamExt;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::window::{DayRange, MailboxSession};

/// Type alias for authenticated IMAP session over TLS
///
/// Wraps the TLS stream type to simplify signatures throughout the codebase.
pub type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Get socket timeout duration from server config
fn socket_timeout(server: &ServerConfig) -> Duration {
    Duration::from_millis(server.socket_timeout_ms)
}

/// Connect to IMAP server and authenticate
///
/// Performs full connection sequence with timeouts:
/// 1. TCP connect
/// 2. TLS handshake with webpki root certificates
/// 3. Read IMAP greeting
/// 4. LOGIN authentication
///
/// # Security
///
/// Rejects insecure connections (`secure: false`) to prevent password exposure.
///
/// # Errors
///
/// - `InvalidInput` if `secure` is false or hostname is invalid for TLS SNI
/// - `Timeout` if any connection phase times out
/// - `AuthFailed` if authentication fails
/// - `Session` for TCP, TLS, or greeting failures
pub async fn connect_authenticated(server: &ServerConfig) -> AppResult<ImapSession> {
    let imap = &server.imap;
    if !imap.secure {
        return Err(AppError::InvalidInput(
            "insecure IMAP is not supported; set MAIL_DIGEST_IMAP_SECURE=true".to_owned(),
        ));
    }

    let connect_duration = Duration::from_millis(server.connect_timeout_ms);
    let greeting_duration = Duration::from_millis(server.greeting_timeout_ms);

    let tcp = timeout(
        connect_duration,
        TcpStream::connect((imap.host.as_str(), imap.port)),
    )
    .await
    .map_err(|_| AppError::Timeout("tcp connect timeout".to_owned()))
    .and_then(|r| r.map_err(|e| AppError::Session(format!("tcp connect failed: {e}"))))?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(imap.host.clone())
        .map_err(|_| AppError::InvalidInput("invalid IMAP host for TLS SNI".to_owned()))?;
    let tls_stream = timeout(greeting_duration, connector.connect(server_name, tcp))
        .await
        .map_err(|_| AppError::Timeout("TLS handshake timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Session(format!("TLS handshake failed: {e}"))))?;

    let mut client = Client::new(tls_stream);
    let greeting = timeout(greeting_duration, client.read_response())
        .await
        .map_err(|_| AppError::Timeout("IMAP greeting timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Session(format!("IMAP greeting failed: {e}"))))?;

    if greeting.is_none() {
        return Err(AppError::Session(
            "IMAP server closed connection before greeting".to_owned(),
        ));
    }

    let pass = imap.pass.expose_secret();
    let session = timeout(greeting_duration, client.login(imap.user.as_str(), pass))
        .await
        .map_err(|_| AppError::Timeout("IMAP login timeout".to_owned()))
        .and_then(|r| r.map_err(|(e, _)| classify_login_error(&e.to_string())))?;

    debug!(host = %imap.host, port = imap.port, "IMAP session authenticated");
    Ok(session)
}

/// Map a LOGIN failure message to an error variant
fn classify_login_error(msg: &str) -> AppError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("auth") || lower.contains("login") || lower.contains("credentials") {
        AppError::AuthFailed(msg.to_owned())
    } else {
        AppError::Session(msg.to_owned())
    }
}

/// Select mailbox in read-only mode
///
/// Uses `EXAMINE` so fetching never changes mailbox state.
pub async fn select_mailbox_readonly(
    server: &ServerConfig,
    session: &mut ImapSession,
    mailbox: &str,
) -> AppResult<()> {
    timeout(socket_timeout(server), session.examine(mailbox))
        .await
        .map_err(|_| AppError::Timeout(format!("EXAMINE timed out for mailbox '{mailbox}'")))
        .and_then(|r| {
            r.map_err(|e| AppError::Session(format!("cannot examine mailbox '{mailbox}': {e}")))
        })?;
    Ok(())
}

/// Search for messages matching query
///
/// Runs `UID SEARCH` and returns matching UIDs in ascending order.
pub async fn uid_search(
    server: &ServerConfig,
    session: &mut ImapSession,
    query: &str,
) -> AppResult<Vec<u32>> {
    let set = timeout(socket_timeout(server), session.uid_search(query))
        .await
        .map_err(|_| AppError::Timeout("UID SEARCH timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Session(format!("uid search failed: {e}"))))?;
    let mut uids: Vec<u32> = set.into_iter().collect();
    uids.sort_unstable();
    Ok(uids)
}

/// Fetch a single message with custom query
///
/// Runs a `UID FETCH` for a specific UID and returns the first result.
pub async fn fetch_one(
    server: &ServerConfig,
    session: &mut ImapSession,
    uid: u32,
    query: &str,
) -> AppResult<Fetch> {
    let stream = timeout(
        socket_timeout(server),
        session.uid_fetch(uid.to_string(), query),
    )
    .await
    .map_err(|_| AppError::Timeout("UID FETCH timed out".to_owned()))
    .and_then(|r| r.map_err(|e| AppError::Session(format!("uid fetch failed: {e}"))))?;
    let fetches: Vec<Fetch> = timeout(socket_timeout(server), stream.try_collect())
        .await
        .map_err(|_| AppError::Timeout("UID FETCH stream timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Session(format!("uid fetch stream failed: {e}"))))?;

    fetches
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Session(format!("message uid {uid} not found")))
}

/// Fetch full RFC822 message source
///
/// Uses `BODY.PEEK[]` so the `\Seen` flag is left untouched.
pub async fn fetch_raw_message(
    server: &ServerConfig,
    session: &mut ImapSession,
    uid: u32,
) -> AppResult<Vec<u8>> {
    let fetch = fetch_one(server, session, uid, "(UID BODY.PEEK[])").await?;
    let body = fetch
        .body()
        .ok_or_else(|| AppError::Session(format!("message uid {uid} has no body")))?;
    Ok(body.to_vec())
}

/// End the session
///
/// Failures are logged, not returned.
pub async fn logout(server: &ServerConfig, session: &mut ImapSession) {
    match timeout(socket_timeout(server), session.logout()).await {
        Ok(Ok(())) => debug!("IMAP session logged out"),
        Ok(Err(e)) => warn!(error = %e, "IMAP logout failed"),
        Err(_) => warn!("IMAP logout timed out"),
    }
}

/// Authenticated session bound to its configuration
pub struct ImapMailbox<'a> {
    server: &'a ServerConfig,
    session: ImapSession,
}

impl<'a> ImapMailbox<'a> {
    /// Connect, authenticate, and wrap the session
    pub async fn connect(server: &'a ServerConfig) -> AppResult<Self> {
        let session = connect_authenticated(server).await?;
        Ok(Self { server, session })
    }

    /// Log out and drop the connection
    pub async fn close(mut self) {
        logout(self.server, &mut self.session).await;
    }
}

#[async_trait]
impl MailboxSession for ImapMailbox<'_> {
    async fn select(&mut self, mailbox: &str) -> AppResult<()> {
        select_mailbox_readonly(self.server, &mut self.session, mailbox).await
    }

    async fn search(&mut self, range: &DayRange) -> AppResult<Vec<u32>> {
        uid_search(self.server, &mut self.session, &range.to_imap_query()).await
    }

    async fn fetch_message(&mut self, id: u32) -> AppResult<Vec<u8>> {
        fetch_raw_message(self.server, &mut self.session, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_login_error, connect_authenticated};
    use crate::config::ServerConfig;
    use crate::errors::AppError;

    #[test]
    fn login_failures_are_classified() {
        assert!(matches!(
            classify_login_error("NO [AUTHENTICATIONFAILED] Invalid credentials"),
            AppError::AuthFailed(_)
        ));
        assert!(matches!(
            classify_login_error("connection reset by peer"),
            AppError::Session(_)
        ));
    }

    #[tokio::test]
    async fn insecure_imap_is_rejected_before_connecting() {
        let mut config = ServerConfig::sample();
        config.imap.secure = false;
        let err = connect_authenticated(&config)
            .await
            .err()
            .expect("insecure connection must be rejected");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
