//! Storage trait and the in-memory store.

use crate::email::{KnowledgeEntry, MailMessage, ParsedMessage, ReplyRecord};
use crate::error::{Error, Result};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The three collections the service keeps: messages, knowledge, replies.
///
/// Every call is fallible so callers can tell an empty collection from an
/// unreachable store.
pub trait Storage: Send + Sync {
    /// Insert the message unless one with the same `(from, subject, date)`
    /// already exists. Returns `true` when a row was inserted.
    fn upsert_message(&self, message: &ParsedMessage) -> Result<bool>;

    /// Most recent messages by date, newest first.
    fn recent_messages(&self, limit: usize) -> Result<Vec<MailMessage>>;

    fn get_message(&self, id: &str) -> Result<Option<MailMessage>>;

    /// Remove a message by id. Returns true if found and removed.
    fn delete_message(&self, id: &str) -> Result<bool>;

    fn insert_knowledge(&self, entry: KnowledgeEntry) -> Result<KnowledgeEntry>;

    /// All knowledge entries in insertion order.
    fn all_knowledge(&self) -> Result<Vec<KnowledgeEntry>>;

    fn get_knowledge(&self, id: &str) -> Result<Option<KnowledgeEntry>>;

    fn delete_knowledge(&self, id: &str) -> Result<bool>;

    fn insert_reply(&self, reply: ReplyRecord) -> Result<ReplyRecord>;

    /// All saved replies in insertion order.
    fn all_replies(&self) -> Result<Vec<ReplyRecord>>;

    fn get_reply(&self, id: &str) -> Result<Option<ReplyRecord>>;

    fn delete_reply(&self, id: &str) -> Result<bool>;

    /// Flush anything pending before shutdown.
    fn close(&self) {}
}

/// Thread-safe store that keeps everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<MailMessage>>,
    knowledge: RwLock<Vec<KnowledgeEntry>>,
    replies: RwLock<Vec<ReplyRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| Error::Database("memory store lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| Error::Database("memory store lock poisoned".into()))
}

fn remove_where<T>(items: &mut Vec<T>, matches: impl Fn(&T) -> bool) -> bool {
    let Some(pos) = items.iter().position(matches) else {
        return false;
    };
    items.remove(pos);
    true
}

impl Storage for MemoryStore {
    fn upsert_message(&self, message: &ParsedMessage) -> Result<bool> {
        let mut messages = write(&self.messages)?;
        let exists = messages.iter().any(|m| {
            m.from == message.from && m.subject == message.subject && m.date == message.date
        });
        if exists {
            return Ok(false);
        }
        messages.push(MailMessage::from_parsed(message.clone()));
        Ok(true)
    }

    fn recent_messages(&self, limit: usize) -> Result<Vec<MailMessage>> {
        let mut messages = read(&self.messages)?.clone();
        messages.sort_by(|a, b| b.date.cmp(&a.date));
        messages.truncate(limit);
        Ok(messages)
    }

    fn get_message(&self, id: &str) -> Result<Option<MailMessage>> {
        Ok(read(&self.messages)?.iter().find(|m| m.id == id).cloned())
    }

    fn delete_message(&self, id: &str) -> Result<bool> {
        Ok(remove_where(&mut *write(&self.messages)?, |m| m.id == id))
    }

    fn insert_knowledge(&self, entry: KnowledgeEntry) -> Result<KnowledgeEntry> {
        write(&self.knowledge)?.push(entry.clone());
        Ok(entry)
    }

    fn all_knowledge(&self) -> Result<Vec<KnowledgeEntry>> {
        Ok(read(&self.knowledge)?.clone())
    }

    fn get_knowledge(&self, id: &str) -> Result<Option<KnowledgeEntry>> {
        Ok(read(&self.knowledge)?.iter().find(|k| k.id == id).cloned())
    }

    fn delete_knowledge(&self, id: &str) -> Result<bool> {
        Ok(remove_where(&mut *write(&self.knowledge)?, |k| k.id == id))
    }

    fn insert_reply(&self, reply: ReplyRecord) -> Result<ReplyRecord> {
        write(&self.replies)?.push(reply.clone());
        Ok(reply)
    }

    fn all_replies(&self) -> Result<Vec<ReplyRecord>> {
        Ok(read(&self.replies)?.clone())
    }

    fn get_reply(&self, id: &str) -> Result<Option<ReplyRecord>> {
        Ok(read(&self.replies)?.iter().find(|r| r.id == id).cloned())
    }

    fn delete_reply(&self, id: &str) -> Result<bool> {
        Ok(remove_where(&mut *write(&self.replies)?, |r| r.id == id))
    }
}
