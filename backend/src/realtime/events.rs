use serde::{Deserialize, Serialize};

use crate::models::{ChatId, MessageId, UserId};

/// Frames a client may send over its duplex connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Typing {
        chat_id: ChatId,
        receiver_id: UserId,
    },
    Delivered {
        chat_id: ChatId,
        receiver_id: UserId,
        message_id: MessageId,
    },
    /// Any other `type`; ignored by the gateway.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// Translate a relayable frame into the `(receiver, event)` to push.
    /// `sender` is the identity bound to the connection, never a client claim.
    pub fn into_relay(self, sender: UserId) -> Option<(UserId, PushEvent)> {
        match self {
            ClientFrame::Typing { chat_id, receiver_id } => Some((
                receiver_id,
                PushEvent::Typing {
                    chat_id,
                    user_id: sender,
                },
            )),
            ClientFrame::Delivered {
                chat_id,
                receiver_id,
                message_id,
            } => Some((
                receiver_id,
                PushEvent::Delivered {
                    chat_id,
                    user_id: sender,
                    message_id,
                },
            )),
            ClientFrame::Unknown => None,
        }
    }
}

/// Server to client events. `user_id` is always the *other* party: the
/// sender, the new match, the typist or the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    Message {
        id: MessageId,
        chat_id: ChatId,
        user_id: UserId,
        content: String,
    },
    Match {
        chat_id: ChatId,
        user_id: UserId,
        content: String,
    },
    Typing {
        chat_id: ChatId,
        user_id: UserId,
    },
    Delivered {
        chat_id: ChatId,
        user_id: UserId,
        message_id: MessageId,
    },
    ReadChat {
        chat_id: ChatId,
        user_id: UserId,
    },
    ReadMessages {
        chat_id: ChatId,
        user_id: UserId,
        message_id: Vec<MessageId>,
    },
}

impl PushEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PushEvent::Message { .. } => "message",
            PushEvent::Match { .. } => "match",
            PushEvent::Typing { .. } => "typing",
            PushEvent::Delivered { .. } => "delivered",
            PushEvent::ReadChat { .. } => "read_chat",
            PushEvent::ReadMessages { .. } => "read_messages",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_client_frames() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"typing","chat_id":3,"receiver_id":9}"#).unwrap();
        assert_eq!(frame, ClientFrame::Typing { chat_id: 3, receiver_id: 9 });

        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"delivered","chat_id":3,"receiver_id":9,"message_id":41}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::Delivered { chat_id: 3, receiver_id: 9, message_id: 41 }
        );
    }

    #[test]
    fn test_unknown_kind_is_not_an_error() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"presence","status":"away"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Unknown);
        assert!(frame.into_relay(1).is_none());
    }

    #[test]
    fn test_malformed_frames_fail_to_parse() {
        assert!(serde_json::from_str::<ClientFrame>("not json").is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"chat_id":3}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"typing","chat_id":"x"}"#).is_err());
    }

    #[test]
    fn test_relay_rewrites_sender() {
        let (receiver, event) = ClientFrame::Typing { chat_id: 3, receiver_id: 9 }
            .into_relay(5)
            .unwrap();
        assert_eq!(receiver, 9);
        assert_eq!(event, PushEvent::Typing { chat_id: 3, user_id: 5 });
    }

    #[test]
    fn test_push_event_wire_shape() {
        let event = PushEvent::ReadMessages { chat_id: 2, user_id: 8, message_id: vec![4, 5] };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "read_messages", "chat_id": 2, "user_id": 8, "message_id": [4, 5]})
        );
        assert_eq!(event.kind(), "read_messages");

        let event = PushEvent::Match { chat_id: 1, user_id: 2, content: "hi".into() };
        assert_eq!(serde_json::to_value(&event).unwrap()["type"], "match");
    }
}
