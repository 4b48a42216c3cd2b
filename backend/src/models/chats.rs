use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use super::{ChatId, MessageId, UserId};
use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Order a user pair so (a, b) and (b, a) resolve to the same chat key.
pub fn canonical_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// A pair-unique conversation. `user1_id < user2_id` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Chat {
    pub id: ChatId,
    pub user1_id: UserId,
    pub user2_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The other participant, or None if `user_id` is not in this chat.
    pub fn counterparty(&self, user_id: UserId) -> Option<UserId> {
        if self.user1_id == user_id {
            Some(self.user2_id)
        } else if self.user2_id == user_id {
            Some(self.user1_id)
        } else {
            None
        }
    }

    /// True when the chat connects exactly these two users, in either order.
    pub fn connects(&self, a: UserId, b: UserId) -> bool {
        canonical_pair(a, b) == (self.user1_id, self.user2_id)
    }
}

/// Row of the caller's chat list.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatSummary {
    pub id: ChatId,
    pub counterparty_id: UserId,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_user: Option<UserId>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::System => "system",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown message kind '{0}'")]
pub struct UnknownMessageKind(String);

impl TryFrom<String> for MessageKind {
    type Error = UnknownMessageKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "text" => Ok(MessageKind::Text),
            "system" => Ok(MessageKind::System),
            _ => Err(UnknownMessageKind(value)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    #[sqlx(try_from = "String")]
    pub kind: MessageKind,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// A message about to be appended; identity and timestamp come from the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub kind: MessageKind,
}

/// Position of a page relative to the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// The most recent messages.
    Latest,
    /// Messages with id < the given id, closest first.
    Before(MessageId),
    /// Messages with id > the given id.
    After(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Cursor,
    pub limit: u32,
}

#[cfg(test)]
impl PageRequest {
    pub fn latest(limit: u32) -> Self {
        Self { cursor: Cursor::Latest, limit: clamp_limit(Some(limit as i64)) }
    }

    pub fn before(id: MessageId, limit: u32) -> Self {
        Self { cursor: Cursor::Before(id), limit: clamp_limit(Some(limit as i64)) }
    }

    pub fn after(id: MessageId, limit: u32) -> Self {
        Self { cursor: Cursor::After(id), limit: clamp_limit(Some(limit as i64)) }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { cursor: Cursor::Latest, limit: DEFAULT_PAGE_SIZE }
    }
}

/// Raw `limit` / `before_id` / `after_id` query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub before_id: Option<MessageId>,
    pub after_id: Option<MessageId>,
}

impl TryFrom<PageQuery> for PageRequest {
    type Error = String;

    fn try_from(query: PageQuery) -> Result<Self, Self::Error> {
        let cursor = match (query.before_id, query.after_id) {
            (Some(_), Some(_)) => return Err("before_id and after_id are mutually exclusive".to_string()),
            (Some(before), None) => Cursor::Before(before),
            (None, Some(after)) => Cursor::After(after),
            (None, None) => Cursor::Latest,
        };
        Ok(Self { cursor, limit: clamp_limit(query.limit) })
    }
}

/// Missing or non-positive limits fall back to the default; large ones are capped.
fn clamp_limit(limit: Option<i64>) -> u32 {
    match limit {
        Some(n) if n > 0 => n.min(MAX_PAGE_SIZE as i64) as u32,
        _ => DEFAULT_PAGE_SIZE,
    }
}
