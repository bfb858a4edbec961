//! Mailbox sync: fetch the newest messages, parse them and store new ones.

use crate::email::ParsedMessage;
use crate::error::{Error, Result};
use crate::mailbox::{FetchRange, MailboxConnector, MailboxSession};
use crate::store::Storage;
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, PartType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAILBOX: &str = "INBOX";

const UNKNOWN_SENDER: &str = "Unknown sender";
const NO_SUBJECT: &str = "(No subject)";

/// Parse raw message bytes into the fields the service keeps.
///
/// The body prefers a real HTML part over plain text. Missing headers fall
/// back to defaults, the date to the Unix epoch. Blank input and input the
/// parser cannot read are rejected.
pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::Parse("message is empty".into()));
    }

    let msg = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| Error::Parse("input is not an RFC 5322 message".into()))?;

    let from = msg
        .from()
        .and_then(|a| a.first())
        .and_then(|a| match (a.name(), a.address()) {
            (Some(name), Some(addr)) => Some(format!("{name} <{addr}>")),
            (Some(name), None) => Some(name.to_string()),
            (None, Some(addr)) => Some(addr.to_string()),
            (None, None) => None,
        })
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());

    let subject = msg
        .subject()
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_SUBJECT)
        .to_string();

    // html_part() also points at text/plain parts when no HTML exists
    let html = msg.html_part(0).and_then(|part| match &part.body {
        PartType::Html(html) if !html.is_empty() => Some(html.to_string()),
        _ => None,
    });
    let body = html
        .or_else(|| {
            msg.body_text(0)
                .filter(|text| !text.is_empty())
                .map(|text| text.into_owned())
        })
        .unwrap_or_default();

    let date = msg
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_default();

    Ok(ParsedMessage {
        from,
        subject,
        body,
        date,
    })
}

/// Parse one message and insert it if absent. Unparseable input is
/// logged and skipped; a storage failure is logged but the message is
/// still reported as fetched.
fn ingest(raw: &[u8], store: &dyn Storage) -> Option<ParsedMessage> {
    let parsed = match parse_message(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(bytes = raw.len(), "skipping message: {e}");
            return None;
        }
    };

    match store.upsert_message(&parsed) {
        Ok(true) => debug!(from = %parsed.from, subject = %parsed.subject, "stored new message"),
        Ok(false) => debug!(from = %parsed.from, subject = %parsed.subject, "message already stored"),
        Err(e) => error!(from = %parsed.from, subject = %parsed.subject, "failed to store message: {e}"),
    }
    Some(parsed)
}

/// Clears the "run active" flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The mailbox sync job.
pub struct MailboxSync {
    connector: Arc<dyn MailboxConnector>,
    store: Arc<dyn Storage>,
    mailbox: String,
    running: AtomicBool,
}

impl MailboxSync {
    #[must_use]
    pub fn new(connector: Arc<dyn MailboxConnector>, store: Arc<dyn Storage>) -> Self {
        Self {
            connector,
            store,
            mailbox: DEFAULT_MAILBOX.to_string(),
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = mailbox.into();
        self
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run once unless another run is in progress, in which case `None`.
    pub async fn run_if_idle(&self) -> Option<Result<Vec<ParsedMessage>>> {
        if self.running.swap(true, Ordering::AcqRel) {
            return None;
        }
        let _guard = RunGuard(&self.running);
        Some(self.run().await)
    }

    /// Connect, fetch the newest window, parse and store every message.
    ///
    /// Returns the fetched messages sorted by date, newest first, whether
    /// or not each one was newly stored.
    pub async fn run(&self) -> Result<Vec<ParsedMessage>> {
        let mut session = self.connector.connect().await?;
        let outcome = self.drain(session.as_mut()).await;

        if let Err(e) = session.end().await {
            warn!("failed to close mailbox session: {e}");
        }

        let mut messages = outcome?;
        messages.sort_by(|a, b| b.date.cmp(&a.date));
        info!(mailbox = %self.mailbox, fetched = messages.len(), "mailbox sync complete");
        Ok(messages)
    }

    async fn drain(&self, session: &mut dyn MailboxSession) -> Result<Vec<ParsedMessage>> {
        let total = session.open(&self.mailbox).await?;
        let Some(range) = FetchRange::for_total(total) else {
            debug!(mailbox = %self.mailbox, "mailbox is empty");
            return Ok(Vec::new());
        };

        debug!(mailbox = %self.mailbox, total, range = %range, "fetching messages");
        let raw_messages = session.fetch(range).await?;

        let mut tasks = JoinSet::new();
        for (index, raw) in raw_messages.into_iter().enumerate() {
            let store = Arc::clone(&self.store);
            tasks.spawn_blocking(move || (index, ingest(&raw, store.as_ref())));
        }

        let mut parsed = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Some(message))) => parsed.push((index, message)),
                Ok((_, None)) => {}
                Err(e) => error!("message task failed: {e}"),
            }
        }

        // Fetch order first so equal dates stay deterministic after the date sort
        parsed.sort_by_key(|(index, _)| *index);
        Ok(parsed.into_iter().map(|(_, message)| message).collect())
    }
}
