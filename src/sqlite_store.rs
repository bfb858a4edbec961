//! `SQLite`-backed storage for persistence.

use crate::email::{KnowledgeEntry, MailMessage, ParsedMessage, ReplyRecord};
use crate::error::{Error, Result};
use crate::store::Storage;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const MESSAGE_COLUMNS: &str = "id, from_addr, subject, body, date_ms, created_ms";
const KNOWLEDGE_COLUMNS: &str = "id, title, content, file_path, created_ms";
const REPLY_COLUMNS: &str = "id, from_addr, subject, email_body, ai_reply, created_ms";

/// `SQLite`-backed store with persistence.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a `SQLite` database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                from_addr TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                date_ms INTEGER NOT NULL,
                created_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS knowledge (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                file_path TEXT,
                created_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS replies (
                id TEXT PRIMARY KEY,
                from_addr TEXT,
                subject TEXT,
                email_body TEXT,
                ai_reply TEXT NOT NULL,
                created_ms INTEGER NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_key
                ON messages(from_addr, subject, date_ms);
            CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date_ms);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("connection lock poisoned".into()))
    }

    fn millis_to_date(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap_or_default()
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MailMessage> {
        Ok(MailMessage {
            id: row.get(0)?,
            from: row.get(1)?,
            subject: row.get(2)?,
            body: row.get(3)?,
            date: Self::millis_to_date(row.get(4)?),
            created_at: Self::millis_to_date(row.get(5)?),
        })
    }

    fn row_to_knowledge(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
        Ok(KnowledgeEntry {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            file_path: row.get(3)?,
            created_at: Self::millis_to_date(row.get(4)?),
        })
    }

    fn row_to_reply(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReplyRecord> {
        Ok(ReplyRecord {
            id: row.get(0)?,
            from: row.get(1)?,
            subject: row.get(2)?,
            email_body: row.get(3)?,
            ai_reply: row.get(4)?,
            created_at: Self::millis_to_date(row.get(5)?),
        })
    }

    fn delete_from(&self, table: &str, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(&format!("DELETE FROM {table} WHERE id = ?"), params![id])?;
        Ok(removed > 0)
    }
}

#[allow(clippy::significant_drop_tightening)]
impl Storage for SqliteStore {
    fn upsert_message(&self, message: &ParsedMessage) -> Result<bool> {
        let record = MailMessage::from_parsed(message.clone());
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages (id, from_addr, subject, body, date_ms, created_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.id,
                record.from,
                record.subject,
                record.body,
                record.date.timestamp_millis(),
                record.created_at.timestamp_millis(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn recent_messages(&self, limit: usize) -> Result<Vec<MailMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY date_ms DESC LIMIT ?"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], Self::row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn get_message(&self, id: &str) -> Result<Option<MailMessage>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"),
                params![id],
                Self::row_to_message,
            )
            .optional()?;
        Ok(record)
    }

    fn delete_message(&self, id: &str) -> Result<bool> {
        self.delete_from("messages", id)
    }

    fn insert_knowledge(&self, entry: KnowledgeEntry) -> Result<KnowledgeEntry> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO knowledge (id, title, content, file_path, created_ms)
             VALUES (?, ?, ?, ?, ?)",
            params![
                entry.id,
                entry.title,
                entry.content,
                entry.file_path,
                entry.created_at.timestamp_millis(),
            ],
        )?;
        Ok(entry)
    }

    fn all_knowledge(&self) -> Result<Vec<KnowledgeEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge ORDER BY rowid ASC"
        ))?;
        let rows = stmt.query_map([], Self::row_to_knowledge)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn get_knowledge(&self, id: &str) -> Result<Option<KnowledgeEntry>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {KNOWLEDGE_COLUMNS} FROM knowledge WHERE id = ?"),
                params![id],
                Self::row_to_knowledge,
            )
            .optional()?;
        Ok(record)
    }

    fn delete_knowledge(&self, id: &str) -> Result<bool> {
        self.delete_from("knowledge", id)
    }

    fn insert_reply(&self, reply: ReplyRecord) -> Result<ReplyRecord> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO replies (id, from_addr, subject, email_body, ai_reply, created_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                reply.id,
                reply.from,
                reply.subject,
                reply.email_body,
                reply.ai_reply,
                reply.created_at.timestamp_millis(),
            ],
        )?;
        Ok(reply)
    }

    fn all_replies(&self) -> Result<Vec<ReplyRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPLY_COLUMNS} FROM replies ORDER BY rowid ASC"
        ))?;
        let rows = stmt.query_map([], Self::row_to_reply)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn get_reply(&self, id: &str) -> Result<Option<ReplyRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {REPLY_COLUMNS} FROM replies WHERE id = ?"),
                params![id],
                Self::row_to_reply,
            )
            .optional()?;
        Ok(record)
    }

    fn delete_reply(&self, id: &str) -> Result<bool> {
        self.delete_from("replies", id)
    }

    fn close(&self) {
        let Ok(conn) = self.lock() else {
            return;
        };
        // Fold the WAL back into the main database file
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        tracing::info!("SQLite database checkpointed and ready for shutdown");
    }
}
