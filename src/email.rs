//! Stored record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Build a record id: creation millis plus a random suffix.
#[must_use]
pub fn new_record_id() -> String {
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// A message pulled from the mailbox and parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub from: String,
    pub subject: String,
    /// HTML body when present, plain text otherwise.
    pub body: String,
    pub date: DateTime<Utc>,
}

impl ParsedMessage {
    /// Deduplication key. Distinct messages sharing all three values collide.
    #[must_use]
    pub fn key(&self) -> (&str, &str, DateTime<Utc>) {
        (&self.from, &self.subject, self.date)
    }
}

/// A stored mailbox message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl MailMessage {
    #[must_use]
    pub fn from_parsed(parsed: ParsedMessage) -> Self {
        Self {
            id: new_record_id(),
            from: parsed.from,
            subject: parsed.subject,
            body: parsed.body,
            date: parsed.date,
            created_at: Utc::now(),
        }
    }
}

/// Knowledge base entry with its text already extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    #[must_use]
    pub fn new(title: String, content: String, file_path: Option<String>) -> Self {
        Self {
            id: new_record_id(),
            title,
            content,
            file_path,
            created_at: Utc::now(),
        }
    }
}

/// A saved reply, kept so later drafts can match its tone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_body: Option<String>,
    pub ai_reply: String,
    pub created_at: DateTime<Utc>,
}

impl ReplyRecord {
    #[must_use]
    pub fn new(
        from: Option<String>,
        subject: Option<String>,
        email_body: Option<String>,
        ai_reply: String,
    ) -> Self {
        Self {
            id: new_record_id(),
            from,
            subject,
            email_body,
            ai_reply,
            created_at: Utc::now(),
        }
    }
}
