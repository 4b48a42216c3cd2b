use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::auth::Authenticator;
use crate::models::{
    Chat, ChatId, ChatSummary, Message, MessageId, NewMessage, PageRequest, SwipeAction, UserId,
};
use super::{chats, messages, sessions, swipes};

/// Persistence operations the match-and-messaging core relies on.
///
/// Implementations must make `get_or_create_chat` race-free across processes:
/// for concurrent calls on the same pair exactly one observes `true`.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_swipe(&self, actor: UserId, target: UserId, action: SwipeAction) -> Result<()>;

    async fn has_liked(&self, actor: UserId, target: UserId) -> Result<bool>;

    /// Remove all of `actor`'s decisions, returning how many were removed.
    async fn clear_swipes(&self, actor: UserId) -> Result<u64>;

    async fn matches_for_user(&self, user: UserId) -> Result<Vec<UserId>>;

    /// Returns the pair's chat id and whether this call created it.
    async fn get_or_create_chat(&self, user_a: UserId, user_b: UserId) -> Result<(ChatId, bool)>;

    /// Like `get_or_create_chat`, but a newly created chat is committed
    /// together with a system message from `actor` to `target`.
    async fn open_match_chat(&self, actor: UserId, target: UserId, content: &str) -> Result<(ChatId, bool)>;

    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>>;

    async fn chats_for_user(&self, user: UserId) -> Result<Vec<ChatSummary>>;

    async fn append_message(&self, message: NewMessage) -> Result<Message>;

    async fn list_messages(&self, chat_id: ChatId, page: PageRequest) -> Result<Vec<Message>>;

    /// Returns the number of messages that went from unread to read.
    async fn mark_chat_read(&self, chat_id: ChatId, reader: UserId) -> Result<u64>;

    /// Returns the ids, ascending, of the listed messages that went from
    /// unread to read.
    async fn mark_messages_read(&self, chat_id: ChatId, reader: UserId, ids: &[MessageId]) -> Result<Vec<MessageId>>;
}

/// Postgres-backed store; the database arbitrates every race.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_swipe(&self, actor: UserId, target: UserId, action: SwipeAction) -> Result<()> {
        swipes::upsert_swipe(&self.pool, actor, target, action).await
    }

    async fn has_liked(&self, actor: UserId, target: UserId) -> Result<bool> {
        swipes::has_liked(&self.pool, actor, target).await
    }

    async fn clear_swipes(&self, actor: UserId) -> Result<u64> {
        swipes::delete_swipes_for_user(&self.pool, actor).await
    }

    async fn matches_for_user(&self, user: UserId) -> Result<Vec<UserId>> {
        swipes::get_mutual_likes(&self.pool, user).await
    }

    async fn get_or_create_chat(&self, user_a: UserId, user_b: UserId) -> Result<(ChatId, bool)> {
        chats::get_or_create_chat(&self.pool, user_a, user_b).await
    }

    async fn open_match_chat(&self, actor: UserId, target: UserId, content: &str) -> Result<(ChatId, bool)> {
        chats::open_match_chat(&self.pool, actor, target, content).await
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>> {
        chats::get_chat_by_id(&self.pool, chat_id).await
    }

    async fn chats_for_user(&self, user: UserId) -> Result<Vec<ChatSummary>> {
        chats::get_chats_for_user(&self.pool, user).await
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        messages::insert_message(&self.pool, &message).await
    }

    async fn list_messages(&self, chat_id: ChatId, page: PageRequest) -> Result<Vec<Message>> {
        messages::get_messages_for_chat(&self.pool, chat_id, page).await
    }

    async fn mark_chat_read(&self, chat_id: ChatId, reader: UserId) -> Result<u64> {
        messages::mark_chat_read(&self.pool, chat_id, reader).await
    }

    async fn mark_messages_read(&self, chat_id: ChatId, reader: UserId, ids: &[MessageId]) -> Result<Vec<MessageId>> {
        messages::mark_messages_read(&self.pool, chat_id, reader, ids).await
    }
}

#[async_trait]
impl Authenticator for PgStore {
    async fn authenticate(&self, bearer: &str) -> Result<Option<UserId>> {
        sessions::get_user_for_access_token(&self.pool, bearer).await
    }
}
