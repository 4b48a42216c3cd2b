use crate::models::{ChatId, Cursor, Message, MessageId, NewMessage, PageRequest, UserId};
use anyhow::Result;
use sqlx::PgPool;

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, receiver_id, content, kind, is_read, created_at";

/// Append a message. The insert only succeeds when sender and receiver are
/// exactly the chat's two participants; the BIGSERIAL id orders the log.
pub async fn insert_message(pool: &PgPool, msg: &NewMessage) -> Result<Message> {
    let query = format!(
        r#"
        INSERT INTO messages (chat_id, sender_id, receiver_id, content, kind)
        SELECT c.id, $2, $3, $4, $5
        FROM chats c
        WHERE c.id = $1
        AND ((c.user1_id = $2 AND c.user2_id = $3) OR (c.user1_id = $3 AND c.user2_id = $2))
        RETURNING {MESSAGE_COLUMNS}
        "#
    );

    let message = sqlx::query_as::<_, Message>(&query)
        .bind(msg.chat_id)
        .bind(msg.sender_id)
        .bind(msg.receiver_id)
        .bind(&msg.content)
        .bind(msg.kind.as_str())
        .fetch_optional(pool)
        .await?;

    message.ok_or_else(|| {
        anyhow::anyhow!(
            "chat {} does not connect users {} and {}",
            msg.chat_id, msg.sender_id, msg.receiver_id
        )
    })
}

/// One page of a chat's log, always ordered oldest-to-newest.
pub async fn get_messages_for_chat(pool: &PgPool, chat_id: ChatId, page: PageRequest) -> Result<Vec<Message>> {
    let limit = page.limit as i64;

    let mut messages = match page.cursor {
        Cursor::Latest => {
            sqlx::query_as::<_, Message>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = $1 ORDER BY id DESC LIMIT $2"
            ))
            .bind(chat_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        Cursor::Before(before_id) => {
            sqlx::query_as::<_, Message>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = $1 AND id < $2 ORDER BY id DESC LIMIT $3"
            ))
            .bind(chat_id)
            .bind(before_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        Cursor::After(after_id) => {
            sqlx::query_as::<_, Message>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = $1 AND id > $2 ORDER BY id ASC LIMIT $3"
            ))
            .bind(chat_id)
            .bind(after_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    // Backward pages are fetched newest-first to pick the rows closest to the cursor.
    if !matches!(page.cursor, Cursor::After(_)) {
        messages.reverse();
    }

    Ok(messages)
}

/// Mark every unread message addressed to `reader_id` in the chat as read.
pub async fn mark_chat_read(pool: &PgPool, chat_id: ChatId, reader_id: UserId) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE messages
        SET is_read = TRUE
        WHERE chat_id = $1 AND receiver_id = $2 AND is_read = FALSE
        "#,
    )
    .bind(chat_id)
    .bind(reader_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Mark the listed messages read and return the ids that changed. Ids outside
/// the chat, addressed to someone else, or already read are left untouched.
pub async fn mark_messages_read(
    pool: &PgPool,
    chat_id: ChatId,
    reader_id: UserId,
    message_ids: &[MessageId],
) -> Result<Vec<MessageId>> {
    let mut marked = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE messages
        SET is_read = TRUE
        WHERE chat_id = $1 AND receiver_id = $2 AND id = ANY($3) AND is_read = FALSE
        RETURNING id
        "#,
    )
    .bind(chat_id)
    .bind(reader_id)
    .bind(message_ids.to_vec())
    .fetch_all(pool)
    .await?;

    marked.sort_unstable();
    Ok(marked)
}
