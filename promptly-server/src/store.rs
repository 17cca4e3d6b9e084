//! Chat persistence.
//!
//! Handlers only see the `ChatStore` trait; `InMemoryChatStore` keeps everything in process
//! memory behind a tokio `RwLock`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

pub const DEFAULT_TITLE: &str = "New chat";
pub const TEASER_LENGTH: usize = 150;

pub type ChatId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: EntryRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<ChatEntry>,
}

impl Chat {
    /// The earliest entry cut to `length` characters, ending in `...` when shortened.
    pub fn teaser(&self, length: usize) -> String {
        let Some(first) = self.entries.iter().min_by_key(|entry| entry.created_at) else {
            return String::new();
        };
        if first.content.chars().count() > length {
            let kept: String = first.content.chars().take(length.saturating_sub(3)).collect();
            format!("{kept}...")
        } else {
            first.content.clone()
        }
    }

    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id,
            title: self.title.clone(),
            teaser: self.teaser(TEASER_LENGTH),
            created_at: self.created_at,
        }
    }
}

/// Listing view of a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: ChatId,
    pub title: String,
    pub teaser: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("chat {0} not found")]
    ChatNotFound(ChatId),
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_chat(&self, title: Option<String>) -> Chat;
    async fn get_chat(&self, id: ChatId) -> Option<Chat>;
    async fn add_entry(
        &self,
        chat_id: ChatId,
        role: EntryRole,
        content: String,
    ) -> Result<ChatEntry, StoreError>;
    /// All chats, newest first.
    async fn list_chats(&self) -> Vec<ChatSummary>;
}

#[derive(Debug, Default)]
struct Inner {
    last_id: ChatId,
    chats: BTreeMap<ChatId, Chat>,
}

#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    inner: RwLock<Inner>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create_chat(&self, title: Option<String>) -> Chat {
        let mut inner = self.inner.write().await;
        inner.last_id += 1;
        let chat = Chat {
            id: inner.last_id,
            title: title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            created_at: Utc::now(),
            entries: Vec::new(),
        };
        inner.chats.insert(chat.id, chat.clone());
        tracing::debug!(chat_id = chat.id, "chat created");
        chat
    }

    async fn get_chat(&self, id: ChatId) -> Option<Chat> {
        self.inner.read().await.chats.get(&id).cloned()
    }

    async fn add_entry(
        &self,
        chat_id: ChatId,
        role: EntryRole,
        content: String,
    ) -> Result<ChatEntry, StoreError> {
        let mut inner = self.inner.write().await;
        let chat = inner.chats.get_mut(&chat_id).ok_or(StoreError::ChatNotFound(chat_id))?;
        let entry = ChatEntry { role, content, created_at: Utc::now() };
        chat.entries.push(entry.clone());
        Ok(entry)
    }

    async fn list_chats(&self) -> Vec<ChatSummary> {
        let inner = self.inner.read().await;
        let mut chats: Vec<ChatSummary> = inner.chats.values().map(Chat::summary).collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        chats
    }
}
