use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::constants::MAX_MESSAGE_CHARS;
use crate::db::Store;
use crate::error::{AppError, AppResult};
use crate::models::{Chat, ChatId, ChatSummary, Message, MessageId, MessageKind, NewMessage, PageRequest, UserId};
use crate::realtime::{Hub, PushEvent};

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessage {
    pub receiver_id: UserId,
    pub content: String,
    #[serde(default)]
    pub chat_id: Option<ChatId>,
}

/// Request-path side of chats: durable append first, then push.
#[derive(Clone)]
pub struct Messenger {
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
}

impl Messenger {
    pub fn new(store: Arc<dyn Store>, hub: Arc<Hub>) -> Self {
        Self { store, hub }
    }

    /// Load a chat the caller takes part in. Chats the caller is not in are
    /// reported as missing rather than forbidden.
    async fn participant_chat(&self, user: UserId, chat_id: ChatId) -> AppResult<Chat> {
        match self.store.get_chat(chat_id).await? {
            Some(chat) if chat.has_participant(user) => Ok(chat),
            _ => Err(AppError::not_found(format!("chat {} not found", chat_id))),
        }
    }

    pub async fn send(&self, sender: UserId, req: SendMessage) -> AppResult<Message> {
        if req.content.trim().is_empty() {
            return Err(AppError::bad_request("content must not be empty"));
        }
        if req.content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AppError::bad_request(format!(
                "content exceeds {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
        if req.receiver_id == sender {
            return Err(AppError::bad_request("cannot send a message to yourself"));
        }

        let chat_id = match req.chat_id {
            Some(chat_id) => {
                let chat = self.participant_chat(sender, chat_id).await?;
                if !chat.connects(sender, req.receiver_id) {
                    return Err(AppError::bad_request("receiver is not part of this chat"));
                }
                chat_id
            }
            None => self.store.get_or_create_chat(sender, req.receiver_id).await?.0,
        };

        let message = self
            .store
            .append_message(NewMessage {
                chat_id,
                sender_id: sender,
                receiver_id: req.receiver_id,
                content: req.content,
                kind: MessageKind::Text,
            })
            .await?;

        let event = PushEvent::Message {
            id: message.id,
            chat_id,
            user_id: sender,
            content: message.content.clone(),
        };
        let delivered = self.hub.send(message.receiver_id, &event).await;
        debug!(user_id = sender, chat_id, message_id = message.id, delivered, "Message stored");

        Ok(message)
    }

    pub async fn list(&self, user: UserId, chat_id: ChatId, page: PageRequest) -> AppResult<Vec<Message>> {
        self.participant_chat(user, chat_id).await?;
        Ok(self.store.list_messages(chat_id, page).await?)
    }

    pub async fn chats(&self, user: UserId) -> AppResult<Vec<ChatSummary>> {
        Ok(self.store.chats_for_user(user).await?)
    }

    /// Mark everything addressed to `reader` in the chat as read.
    pub async fn mark_chat_read(&self, reader: UserId, chat_id: ChatId) -> AppResult<u64> {
        let chat = self.participant_chat(reader, chat_id).await?;
        let updated = self.store.mark_chat_read(chat_id, reader).await?;

        if updated > 0 {
            if let Some(counterparty) = chat.counterparty(reader) {
                let event = PushEvent::ReadChat {
                    chat_id,
                    user_id: reader,
                };
                self.hub.send(counterparty, &event).await;
            }
        }
        Ok(updated)
    }

    pub async fn mark_messages_read(
        &self,
        reader: UserId,
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
    ) -> AppResult<u64> {
        if message_ids.is_empty() {
            return Err(AppError::bad_request("no message ids provided"));
        }
        let chat = self.participant_chat(reader, chat_id).await?;
        let marked = self.store.mark_messages_read(chat_id, reader, &message_ids).await?;
        let updated = marked.len() as u64;

        // Only ids that actually changed state are announced.
        if !marked.is_empty() {
            if let Some(counterparty) = chat.counterparty(reader) {
                let event = PushEvent::ReadMessages {
                    chat_id,
                    user_id: reader,
                    message_id: marked,
                };
                self.hub.send(counterparty, &event).await;
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::realtime::{ConnectionHandle, Outbound};

    fn setup() -> (Arc<MemoryStore>, Arc<Hub>, Messenger) {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(Hub::new());
        let messenger = Messenger::new(store.clone(), hub.clone());
        (store, hub, messenger)
    }

    fn text(receiver: UserId, content: &str) -> SendMessage {
        SendMessage {
            receiver_id: receiver,
            content: content.to_string(),
            chat_id: None,
        }
    }

    fn next_event(rx: &mut tokio::sync::mpsc::Receiver<Outbound>) -> Option<PushEvent> {
        match rx.try_recv().ok()? {
            Outbound::Text(text) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_send_creates_chat_and_pushes() {
        let (store, hub, messenger) = setup();
        let (handle, mut rx) = ConnectionHandle::new(2);
        hub.register(handle).await;

        let message = messenger.send(1, text(2, "hello")).await.unwrap();
        assert_eq!(store.chat_count().await, 1);
        assert_eq!(message.kind, MessageKind::Text);

        assert_eq!(
            next_event(&mut rx),
            Some(PushEvent::Message {
                id: message.id,
                chat_id: message.chat_id,
                user_id: 1,
                content: "hello".into(),
            })
        );

        // Reply lands in the same chat.
        let reply = messenger.send(2, text(1, "hi")).await.unwrap();
        assert_eq!(reply.chat_id, message.chat_id);
        assert_eq!(store.chat_count().await, 1);
    }

    #[tokio::test]
    async fn test_send_validation() {
        let (_, _, messenger) = setup();
        assert!(matches!(messenger.send(1, text(2, "   ")).await, Err(AppError::BadRequest(_))));
        assert!(matches!(messenger.send(1, text(1, "me")).await, Err(AppError::BadRequest(_))));

        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(messenger.send(1, text(2, &long)).await, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_send_with_foreign_chat_id() {
        let (store, _, messenger) = setup();
        let (chat_id, _) = store.get_or_create_chat(1, 2).await.unwrap();

        let mut req = text(3, "sneaky");
        req.chat_id = Some(chat_id);
        assert!(matches!(messenger.send(1, req).await, Err(AppError::BadRequest(_))));

        let mut req = text(1, "outsider");
        req.chat_id = Some(chat_id);
        assert!(matches!(messenger.send(3, req).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_only_participants_list_messages() {
        let (_, _, messenger) = setup();
        let message = messenger.send(1, text(2, "hello")).await.unwrap();

        let page = messenger.list(2, message.chat_id, PageRequest::default()).await.unwrap();
        assert_eq!(page.len(), 1);

        let err = messenger.list(3, message.chat_id, PageRequest::default()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_chat_read_is_idempotent_and_notifies_once() {
        let (_, hub, messenger) = setup();
        let (handle, mut rx) = ConnectionHandle::new(1);
        hub.register(handle).await;

        let first = messenger.send(1, text(2, "one")).await.unwrap();
        messenger.send(1, text(2, "two")).await.unwrap();

        assert_eq!(messenger.mark_chat_read(2, first.chat_id).await.unwrap(), 2);
        assert_eq!(
            next_event(&mut rx),
            Some(PushEvent::ReadChat { chat_id: first.chat_id, user_id: 2 })
        );

        assert_eq!(messenger.mark_chat_read(2, first.chat_id).await.unwrap(), 0);
        assert_eq!(next_event(&mut rx), None);

        // The sender's own messages are not addressed to them.
        assert_eq!(messenger.mark_chat_read(1, first.chat_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_messages_read() {
        let (_, hub, messenger) = setup();
        let (handle, mut rx) = ConnectionHandle::new(1);
        hub.register(handle).await;

        let first = messenger.send(1, text(2, "one")).await.unwrap();
        messenger.send(1, text(2, "two")).await.unwrap();

        let err = messenger.mark_messages_read(2, first.chat_id, vec![]).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        assert_eq!(messenger.mark_messages_read(2, first.chat_id, vec![first.id]).await.unwrap(), 1);
        assert_eq!(
            next_event(&mut rx),
            Some(PushEvent::ReadMessages {
                chat_id: first.chat_id,
                user_id: 2,
                message_id: vec![first.id],
            })
        );
        assert_eq!(messenger.mark_messages_read(2, first.chat_id, vec![first.id]).await.unwrap(), 0);

        let chats = messenger.chats(2).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].unread_count, 1);
        assert_eq!(chats[0].last_message.as_deref(), Some("two"));
        assert_eq!(chats[0].last_message_user, Some(1));
    }

    #[tokio::test]
    async fn test_read_receipt_lists_only_newly_read_ids() {
        let (_, hub, messenger) = setup();
        let (handle, mut rx) = ConnectionHandle::new(1);
        hub.register(handle).await;

        let first = messenger.send(1, text(2, "one")).await.unwrap();
        let second = messenger.send(1, text(2, "two")).await.unwrap();
        let own = messenger.send(2, text(1, "mine")).await.unwrap();
        let elsewhere = messenger.send(3, text(2, "other chat")).await.unwrap();
        messenger.mark_messages_read(2, first.chat_id, vec![first.id]).await.unwrap();
        while next_event(&mut rx).is_some() {}

        let ids = vec![first.id, second.id, own.id, elsewhere.id, 9999];
        assert_eq!(messenger.mark_messages_read(2, first.chat_id, ids).await.unwrap(), 1);
        assert_eq!(
            next_event(&mut rx),
            Some(PushEvent::ReadMessages {
                chat_id: first.chat_id,
                user_id: 2,
                message_id: vec![second.id],
            })
        );
        assert_eq!(next_event(&mut rx), None);
    }
}
