use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::clock::now_millis;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Voice,
    File,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug)]
pub struct NewMessage {
    pub from_username: String,
    pub to_username: String,
    pub body: String,
    pub kind: MessageKind,
    pub file_name: Option<String>,
    pub media_url: Option<String>,
    pub mime_type: Option<String>,
    pub reply_text: Option<String>,
    pub reply_sender_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StoredMessage {
    pub id: i64,
    pub from_username: String,
    pub to_username: String,
    pub body: String,
    pub kind: MessageKind,
    pub file_name: Option<String>,
    pub media_url: Option<String>,
    pub mime_type: Option<String>,
    pub reply_text: Option<String>,
    pub reply_sender_name: Option<String>,
    pub reaction: Option<String>,
    pub edited: bool,
    pub edited_at: Option<i64>,
    pub created_at: i64,
}

/// Durable conversation storage. The coordinator only depends on this
/// boundary; a database-backed implementation can be swapped in without
/// touching the routing code.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<StoredMessage>, StoreError>;

    /// Both directions of one conversation, ordered by creation time.
    async fn find_conversation(&self, user_a: &str, user_b: &str)
        -> Result<Vec<StoredMessage>, StoreError>;

    async fn update_body(
        &self,
        id: i64,
        body: String,
        edited_at: i64,
    ) -> Result<Option<StoredMessage>, StoreError>;

    async fn update_reaction(
        &self,
        id: i64,
        reaction: Option<String>,
    ) -> Result<Option<StoredMessage>, StoreError>;
}

/// Process-local store; conversation history does not survive a restart.
pub struct InMemoryMessageStore {
    messages: RwLock<HashMap<i64, StoredMessage>>,
    next_id: AtomicI64,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        InMemoryMessageStore {
            messages: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stored = StoredMessage {
            id,
            from_username: message.from_username,
            to_username: message.to_username,
            body: message.body,
            kind: message.kind,
            file_name: message.file_name,
            media_url: message.media_url,
            mime_type: message.mime_type,
            reply_text: message.reply_text,
            reply_sender_name: message.reply_sender_name,
            reaction: None,
            edited: false,
            edited_at: None,
            created_at: now_millis(),
        };
        self.messages.write().await.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.messages.read().await.get(&id).cloned())
    }

    async fn find_conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = self.messages.read().await;
        let mut rows: Vec<StoredMessage> = messages
            .values()
            .filter(|row| {
                (row.from_username == user_a && row.to_username == user_b)
                    || (row.from_username == user_b && row.to_username == user_a)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| (row.created_at, row.id));
        Ok(rows)
    }

    async fn update_body(
        &self,
        id: i64,
        body: String,
        edited_at: i64,
    ) -> Result<Option<StoredMessage>, StoreError> {
        let mut messages = self.messages.write().await;
        Ok(messages.get_mut(&id).map(|row| {
            row.body = body;
            row.edited = true;
            row.edited_at = Some(edited_at);
            row.clone()
        }))
    }

    async fn update_reaction(
        &self,
        id: i64,
        reaction: Option<String>,
    ) -> Result<Option<StoredMessage>, StoreError> {
        let mut messages = self.messages.write().await;
        Ok(messages.get_mut(&id).map(|row| {
            row.reaction = reaction;
            row.clone()
        }))
    }
}
