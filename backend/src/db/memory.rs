use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::auth::Authenticator;
use crate::models::{
    canonical_pair, Chat, ChatId, ChatSummary, Cursor, Message, MessageId, MessageKind, NewMessage,
    PageRequest, Swipe, SwipeAction, UserId,
};
use super::store::Store;

#[derive(Default)]
struct Tables {
    swipes: HashMap<(UserId, UserId), Swipe>,
    chats_by_pair: HashMap<(UserId, UserId), ChatId>,
    chats: HashMap<ChatId, Chat>,
    /// Per-chat log, ascending by id.
    messages: HashMap<ChatId, Vec<Message>>,
    access_tokens: HashMap<String, UserId>,
    last_chat_id: ChatId,
    last_message_id: MessageId,
}

impl Tables {
    fn resolve_chat(&mut self, user_a: UserId, user_b: UserId) -> Result<(ChatId, bool)> {
        let pair = canonical_pair(user_a, user_b);
        if pair.0 == pair.1 {
            anyhow::bail!("a chat needs two distinct users, got {} twice", user_a);
        }
        if let Some(chat_id) = self.chats_by_pair.get(&pair) {
            return Ok((*chat_id, false));
        }

        self.last_chat_id += 1;
        let chat_id = self.last_chat_id;
        self.chats_by_pair.insert(pair, chat_id);
        self.chats.insert(
            chat_id,
            Chat {
                id: chat_id,
                user1_id: pair.0,
                user2_id: pair.1,
                created_at: Utc::now(),
            },
        );
        Ok((chat_id, true))
    }

    fn append(&mut self, message: NewMessage) -> Result<Message> {
        let chat = self
            .chats
            .get(&message.chat_id)
            .ok_or_else(|| anyhow::anyhow!("chat {} does not exist", message.chat_id))?;
        if message.sender_id == message.receiver_id || !chat.connects(message.sender_id, message.receiver_id) {
            anyhow::bail!(
                "chat {} does not connect users {} and {}",
                message.chat_id, message.sender_id, message.receiver_id
            );
        }

        self.last_message_id += 1;
        let stored = Message {
            id: self.last_message_id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            kind: message.kind,
            is_read: false,
            created_at: Utc::now(),
        };
        self.messages.entry(stored.chat_id).or_default().push(stored.clone());
        Ok(stored)
    }
}

/// In-process store for development and tests.
///
/// Every operation holds the single table lock from start to finish, which
/// gives the same per-operation atomicity the relational store provides.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bearer token as the auth service would.
    pub async fn grant_access_token(&self, token: impl Into<String>, user_id: UserId) {
        self.tables.lock().await.access_tokens.insert(token.into(), user_id);
    }

    pub async fn chat_count(&self) -> usize {
        self.tables.lock().await.chats.len()
    }
}

/// Select the page out of an ascending log; the result stays ascending.
fn page_slice(log: &[Message], page: PageRequest) -> &[Message] {
    let limit = page.limit as usize;
    match page.cursor {
        Cursor::Latest => &log[log.len().saturating_sub(limit)..],
        Cursor::Before(before_id) => {
            let end = log.partition_point(|m| m.id < before_id);
            &log[end.saturating_sub(limit)..end]
        }
        Cursor::After(after_id) => {
            let start = log.partition_point(|m| m.id <= after_id);
            let end = (start + limit).min(log.len());
            &log[start..end]
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_swipe(&self, actor: UserId, target: UserId, action: SwipeAction) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.swipes.insert(
            (actor, target),
            Swipe {
                user_id: actor,
                target_id: target,
                action,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn has_liked(&self, actor: UserId, target: UserId) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .swipes
            .get(&(actor, target))
            .is_some_and(|s| s.action == SwipeAction::Like))
    }

    async fn clear_swipes(&self, actor: UserId) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.swipes.len();
        tables.swipes.retain(|(user_id, _), _| *user_id != actor);
        Ok((before - tables.swipes.len()) as u64)
    }

    async fn matches_for_user(&self, user: UserId) -> Result<Vec<UserId>> {
        let tables = self.tables.lock().await;
        let liked = |from: UserId, to: UserId| {
            tables
                .swipes
                .get(&(from, to))
                .is_some_and(|s| s.action == SwipeAction::Like)
        };
        let mut ids: Vec<UserId> = tables
            .swipes
            .keys()
            .filter(|(from, _)| *from == user)
            .map(|(_, to)| *to)
            .filter(|to| liked(user, *to) && liked(*to, user))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn get_or_create_chat(&self, user_a: UserId, user_b: UserId) -> Result<(ChatId, bool)> {
        self.tables.lock().await.resolve_chat(user_a, user_b)
    }

    async fn open_match_chat(&self, actor: UserId, target: UserId, content: &str) -> Result<(ChatId, bool)> {
        let mut tables = self.tables.lock().await;
        let (chat_id, created) = tables.resolve_chat(actor, target)?;
        if created {
            tables.append(NewMessage {
                chat_id,
                sender_id: actor,
                receiver_id: target,
                content: content.to_string(),
                kind: MessageKind::System,
            })?;
        }
        Ok((chat_id, created))
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>> {
        Ok(self.tables.lock().await.chats.get(&chat_id).cloned())
    }

    async fn chats_for_user(&self, user: UserId) -> Result<Vec<ChatSummary>> {
        let tables = self.tables.lock().await;
        let mut summaries: Vec<ChatSummary> = tables
            .chats
            .values()
            .filter_map(|chat| {
                let counterparty_id = chat.counterparty(user)?;
                let log = tables.messages.get(&chat.id).map(Vec::as_slice).unwrap_or_default();
                let last = log.last();
                Some(ChatSummary {
                    id: chat.id,
                    counterparty_id,
                    created_at: chat.created_at,
                    last_message: last.map(|m| m.content.clone()),
                    last_message_at: last.map(|m| m.created_at),
                    last_message_user: last.map(|m| m.sender_id),
                    unread_count: log.iter().filter(|m| m.receiver_id == user && !m.is_read).count() as i64,
                })
            })
            .collect();

        summaries.sort_by(|a, b| {
            let a_at = a.last_message_at.unwrap_or(a.created_at);
            let b_at = b.last_message_at.unwrap_or(b.created_at);
            b_at.cmp(&a_at).then(b.id.cmp(&a.id))
        });
        Ok(summaries)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        self.tables.lock().await.append(message)
    }

    async fn list_messages(&self, chat_id: ChatId, page: PageRequest) -> Result<Vec<Message>> {
        let tables = self.tables.lock().await;
        let log = tables.messages.get(&chat_id).map(Vec::as_slice).unwrap_or_default();
        Ok(page_slice(log, page).to_vec())
    }

    async fn mark_chat_read(&self, chat_id: ChatId, reader: UserId) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut changed = 0;
        if let Some(log) = tables.messages.get_mut(&chat_id) {
            for m in log.iter_mut().filter(|m| m.receiver_id == reader && !m.is_read) {
                m.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn mark_messages_read(&self, chat_id: ChatId, reader: UserId, ids: &[MessageId]) -> Result<Vec<MessageId>> {
        let mut tables = self.tables.lock().await;
        let mut marked = Vec::new();
        if let Some(log) = tables.messages.get_mut(&chat_id) {
            for m in log
                .iter_mut()
                .filter(|m| m.receiver_id == reader && !m.is_read && ids.contains(&m.id))
            {
                m.is_read = true;
                marked.push(m.id);
            }
        }
        Ok(marked)
    }
}

#[async_trait]
impl Authenticator for MemoryStore {
    async fn authenticate(&self, bearer: &str) -> Result<Option<UserId>> {
        Ok(self.tables.lock().await.access_tokens.get(bearer).copied())
    }
}
