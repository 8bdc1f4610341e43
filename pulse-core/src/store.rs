//! Message Store Gateway.
//!
//! [`ChatStore`] is the only way the live layer touches persisted chats and
//! messages. Calls are synchronous and authoritative: when `add_message`
//! returns, the message row and the chat's `last_message_at`/`unread_count`
//! bump are both visible, or neither is.
//!
//! [`MemoryChatStore`] keeps everything behind a single lock, which is what
//! makes the insert and the chat update atomic together.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::model::{Chat, Message};
use crate::security::SecurityService;

/// Gateway errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Chat not found: {0}")]
    ChatNotFound(i64),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence and lookup interface for chats and messages.
pub trait ChatStore: Send + Sync {
    /// Insert a message and bump its chat (timestamp + unread) atomically.
    /// The returned message carries the plaintext body.
    fn add_message(&self, chat_id: i64, sender: &str, body: &str) -> Result<Message, StoreError>;

    fn get_chat_by_id(&self, id: i64) -> Result<Option<Chat>, StoreError>;

    /// Chats ordered by `last_message_at`, newest first.
    fn get_chats(&self, limit: usize, offset: usize) -> Result<Vec<Chat>, StoreError>;

    /// Messages of one chat ordered by `ts`, newest first.
    fn get_messages(&self, chat_id: i64, limit: usize, offset: usize) -> Result<Vec<Message>, StoreError>;

    fn mark_as_read(&self, chat_id: i64) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Tables {
    chats: HashMap<i64, Chat>,
    /// Per chat, in insertion (= timestamp) order
    messages: HashMap<i64, Vec<Message>>,
    next_chat_id: i64,
    next_message_id: i64,
}

/// In-memory [`ChatStore`] for the desktop host and tests.
pub struct MemoryChatStore {
    tables: RwLock<Tables>,
    security: Arc<dyn SecurityService>,
}

impl MemoryChatStore {
    pub fn new(security: Arc<dyn SecurityService>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            security,
        }
    }

    /// Create an empty chat and return its id.
    pub fn create_chat(&self, title: impl Into<String>) -> Result<i64, StoreError> {
        let mut tables = self.write()?;
        tables.next_chat_id += 1;
        let id = tables.next_chat_id;
        tables.chats.insert(id, Chat::new(id, title));
        tables.messages.insert(id, Vec::new());
        Ok(id)
    }

    /// Insert a message with an explicit timestamp (used for back-dated seed data).
    pub fn insert_message_at(
        &self,
        chat_id: i64,
        ts: i64,
        sender: &str,
        body: &str,
    ) -> Result<Message, StoreError> {
        let stored_body = self.security.encrypt(body);
        let mut tables = self.write()?;
        let tables = &mut *tables;

        let chat = tables
            .chats
            .get_mut(&chat_id)
            .ok_or(StoreError::ChatNotFound(chat_id))?;
        // Never move a chat's clock backwards.
        let ts = ts.max(chat.last_message_at);
        chat.last_message_at = ts;
        chat.unread_count += 1;

        tables.next_message_id += 1;
        let stored = Message {
            id: tables.next_message_id,
            chat_id,
            ts,
            sender: sender.to_string(),
            body: stored_body,
        };
        let message = Message {
            body: body.to_string(),
            ..stored.clone()
        };
        tables.messages.entry(chat_id).or_default().push(stored);
        Ok(message)
    }

    /// Delete every chat and message. Ids keep counting up, so ids handed
    /// out before the wipe are never reused.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.chats.clear();
        tables.messages.clear();
        Ok(())
    }

    /// Total number of stored messages across all chats.
    pub fn message_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.messages.values().map(Vec::len).sum())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl ChatStore for MemoryChatStore {
    fn add_message(&self, chat_id: i64, sender: &str, body: &str) -> Result<Message, StoreError> {
        self.insert_message_at(chat_id, chrono::Utc::now().timestamp_millis(), sender, body)
    }

    fn get_chat_by_id(&self, id: i64) -> Result<Option<Chat>, StoreError> {
        Ok(self.read()?.chats.get(&id).cloned())
    }

    fn get_chats(&self, limit: usize, offset: usize) -> Result<Vec<Chat>, StoreError> {
        let tables = self.read()?;
        let mut chats: Vec<Chat> = tables.chats.values().cloned().collect();
        chats.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(chats.into_iter().skip(offset).take(limit).collect())
    }

    fn get_messages(&self, chat_id: i64, limit: usize, offset: usize) -> Result<Vec<Message>, StoreError> {
        let tables = self.read()?;
        let Some(messages) = tables.messages.get(&chat_id) else {
            return Ok(Vec::new());
        };
        Ok(messages
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .map(|m| Message {
                body: self.security.decrypt(&m.body),
                ..m.clone()
            })
            .collect())
    }

    fn mark_as_read(&self, chat_id: i64) -> Result<(), StoreError> {
        if let Some(chat) = self.write()?.chats.get_mut(&chat_id) {
            chat.unread_count = 0;
        }
        Ok(())
    }
}
