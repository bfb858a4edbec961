//! Mailbox access: the connector/session seam and its IMAP implementation.

use crate::error::{Error, Result};
use async_imap::types::Fetch;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Only this many of the newest messages are fetched per run.
pub const FETCH_WINDOW: u32 = 50;

/// Inclusive sequence-number window covering the newest messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRange {
    pub start: u32,
    pub end: u32,
}

impl FetchRange {
    /// Window for a mailbox holding `total` messages, `None` when empty.
    #[must_use]
    pub const fn for_total(total: u32) -> Option<Self> {
        if total == 0 {
            return None;
        }
        let start = if total > FETCH_WINDOW {
            total - (FETCH_WINDOW - 1)
        } else {
            1
        };
        Some(Self { start, end: total })
    }

    /// Number of messages the window covers.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.end - self.start + 1
    }
}

impl fmt::Display for FetchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:*", self.start)
    }
}

/// Opens sessions against a mailbox server.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>>;
}

/// One authenticated mailbox session.
#[async_trait]
pub trait MailboxSession: Send {
    /// Open the named mailbox and return how many messages it holds.
    async fn open(&mut self, name: &str) -> Result<u32>;

    /// Fetch the raw RFC 5322 bytes of every message in the range.
    async fn fetch(&mut self, range: FetchRange) -> Result<Vec<Vec<u8>>>;

    async fn end(&mut self) -> Result<()>;
}

/// IMAP server settings.
#[derive(Clone, Default)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub tls: bool,
}

impl ImapConfig {
    /// Check if a mailbox is configured at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.host.is_empty() && !self.user.is_empty()
    }
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("tls", &self.tls)
            .finish()
    }
}

/// [`MailboxConnector`] backed by `async-imap`.
pub struct ImapConnector {
    config: ImapConfig,
}

impl ImapConnector {
    #[must_use]
    pub const fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>> {
        let host = self.config.host.as_str();
        info!(host, port = self.config.port, tls = self.config.tls, "connecting to IMAP server");

        let tcp = TcpStream::connect((host, self.config.port))
            .await
            .map_err(|e| Error::Mailbox(format!("TCP connect to {host} failed: {e}")))?;

        if self.config.tls {
            let server_name = ServerName::try_from(host.to_owned())
                .map_err(|e| Error::Tls(format!("invalid server name {host}: {e}")))?;
            let stream = tls_connector()?
                .connect(server_name, tcp)
                .await
                .map_err(|e| Error::Tls(format!("handshake with {host} failed: {e}")))?;
            Ok(Box::new(login(stream, &self.config).await?))
        } else {
            Ok(Box::new(login(tcp, &self.config).await?))
        }
    }
}

fn tls_connector() -> Result<TlsConnector> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

async fn login<T>(stream: T, config: &ImapConfig) -> Result<ImapSession<T>>
where
    T: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    let mut client = async_imap::Client::new(stream);

    // The greeting has to be consumed before the first command
    let _greeting = client
        .read_response()
        .await
        .ok_or_else(|| Error::Mailbox("connection closed before greeting".into()))?
        .map_err(|e| Error::Mailbox(format!("failed to read server greeting: {e}")))?;

    let session = client
        .login(&config.user, &config.password)
        .await
        .map_err(|(e, _)| Error::Mailbox(format!("login failed for {}: {e}", config.user)))?;

    debug!(user = %config.user, "IMAP login ok");
    Ok(ImapSession { session })
}

struct ImapSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    session: async_imap::Session<T>,
}

#[async_trait]
impl<T> MailboxSession for ImapSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    async fn open(&mut self, name: &str) -> Result<u32> {
        // EXAMINE keeps the mailbox read-only
        let mailbox = self.session.examine(name).await?;
        Ok(mailbox.exists)
    }

    async fn fetch(&mut self, range: FetchRange) -> Result<Vec<Vec<u8>>> {
        // PEEK so fetching never sets \Seen
        let fetches: Vec<Fetch> = self
            .session
            .fetch(range.to_string(), "BODY.PEEK[]")
            .await?
            .try_collect()
            .await?;

        Ok(fetches
            .iter()
            .filter_map(|fetch| {
                let body = fetch.body();
                if body.is_none() {
                    warn!(seq = fetch.message, "fetch response carried no body");
                }
                body.map(<[u8]>::to_vec)
            })
            .collect())
    }

    async fn end(&mut self) -> Result<()> {
        self.session.logout().await?;
        Ok(())
    }
}
