use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::constants::MATCH_MESSAGE;
use crate::db::Store;
use crate::error::{AppError, AppResult};
use crate::models::{ChatId, SwipeAction, UserId};
use crate::realtime::{Hub, PushEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeStatus {
    Like,
    Dislike,
    Match,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwipeOutcome {
    pub status: SwipeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
}

impl SwipeOutcome {
    fn recorded(action: SwipeAction) -> Self {
        let status = match action {
            SwipeAction::Like => SwipeStatus::Like,
            SwipeAction::Dislike => SwipeStatus::Dislike,
        };
        Self {
            status,
            content: None,
            chat_id: None,
        }
    }

    fn matched(target: UserId, chat_id: ChatId) -> Self {
        Self {
            status: SwipeStatus::Match,
            content: Some(format!("It's a match with user {}!", target)),
            chat_id: Some(chat_id),
        }
    }
}

/// Records swipe decisions and turns mutual likes into chats.
///
/// The seed message is committed with the chat, and pushes go out only from
/// the caller whose `open_match_chat` created it, so two users liking each
/// other at the same moment still produce exactly one announcement.
#[derive(Clone)]
pub struct MatchEngine {
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn Store>, hub: Arc<Hub>) -> Self {
        Self { store, hub }
    }

    pub async fn decide(&self, actor: UserId, target: UserId, action: SwipeAction) -> AppResult<SwipeOutcome> {
        if actor == target {
            return Err(AppError::bad_request("target_id can't be yours"));
        }

        self.store.upsert_swipe(actor, target, action).await?;
        debug!(user_id = actor, target, action = %action, "Swipe recorded");

        if action == SwipeAction::Dislike || !self.store.has_liked(target, actor).await? {
            return Ok(SwipeOutcome::recorded(action));
        }

        let (chat_id, created) = self.store.open_match_chat(actor, target, MATCH_MESSAGE).await?;
        if created {
            self.announce_match(chat_id, actor, target).await;
        } else {
            debug!(user_id = actor, target, chat_id, "Mutual like on existing chat, not announcing");
        }

        Ok(SwipeOutcome::matched(target, chat_id))
    }

    /// Push `match` to both users. The seed message is already stored with the chat.
    async fn announce_match(&self, chat_id: ChatId, actor: UserId, target: UserId) {
        for (recipient, counterparty) in [(actor, target), (target, actor)] {
            let event = PushEvent::Match {
                chat_id,
                user_id: counterparty,
                content: MATCH_MESSAGE.to_string(),
            };
            let delivered = self.hub.send(recipient, &event).await;
            debug!(user_id = recipient, chat_id, delivered, "Match push");
        }

        info!(chat_id, user_id = actor, target, "New match");
    }

    /// Forget every decision `actor` has made.
    pub async fn reset(&self, actor: UserId) -> AppResult<u64> {
        let removed = self.store.clear_swipes(actor).await?;
        info!(user_id = actor, removed, "Swipes reset");
        Ok(removed)
    }

    pub async fn matches(&self, user: UserId) -> AppResult<Vec<UserId>> {
        Ok(self.store.matches_for_user(user).await?)
    }
}
