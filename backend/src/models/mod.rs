pub mod chats;
pub mod swipes;

pub use chats::{
    canonical_pair, Chat, ChatSummary, Cursor, Message, MessageKind, NewMessage, PageQuery,
    PageRequest,
};
pub use swipes::{Swipe, SwipeAction};

/// Stable numeric identity issued by the external auth service.
pub type UserId = i64;
pub type ChatId = i64;
pub type MessageId = i64;
