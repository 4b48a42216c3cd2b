use crate::models::{canonical_pair, Chat, ChatId, ChatSummary, MessageKind, UserId};
use anyhow::Result;
use sqlx::{PgConnection, PgPool};

/// Resolve the chat for an unordered pair, creating it if absent.
pub async fn get_or_create_chat(pool: &PgPool, user_a: UserId, user_b: UserId) -> Result<(ChatId, bool)> {
    let mut tx = pool.begin().await?;
    let outcome = resolve_chat(&mut tx, user_a, user_b).await?;
    tx.commit().await?;
    Ok(outcome)
}

/// Resolve the pair's chat; when this call creates it, the system message is
/// inserted in the same transaction so a created chat always has its seed.
pub async fn open_match_chat(pool: &PgPool, actor: UserId, target: UserId, content: &str) -> Result<(ChatId, bool)> {
    let mut tx = pool.begin().await?;
    let (chat_id, created) = resolve_chat(&mut tx, actor, target).await?;

    if created {
        sqlx::query(
            r#"
            INSERT INTO messages (chat_id, sender_id, receiver_id, content, kind)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(chat_id)
        .bind(actor)
        .bind(target)
        .bind(content)
        .bind(MessageKind::System.as_str())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok((chat_id, created))
}

/// Insert-if-absent followed by a read, inside the caller's transaction. The
/// unique index on (user1_id, user2_id) decides which concurrent caller
/// creates the row; every other caller gets `false`.
async fn resolve_chat(conn: &mut PgConnection, user_a: UserId, user_b: UserId) -> Result<(ChatId, bool)> {
    let (user1_id, user2_id) = canonical_pair(user_a, user_b);

    let inserted = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO chats (user1_id, user2_id)
        VALUES ($1, $2)
        ON CONFLICT (user1_id, user2_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(user1_id)
    .bind(user2_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(chat_id) = inserted {
        return Ok((chat_id, true));
    }

    let chat_id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM chats WHERE user1_id = $1 AND user2_id = $2",
    )
    .bind(user1_id)
    .bind(user2_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok((chat_id, false))
}

pub async fn get_chat_by_id(pool: &PgPool, chat_id: ChatId) -> Result<Option<Chat>> {
    let chat = sqlx::query_as::<_, Chat>(
        "SELECT id, user1_id, user2_id, created_at FROM chats WHERE id = $1",
    )
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;

    Ok(chat)
}

/// The user's chats with last-message preview and unread count, newest activity first.
pub async fn get_chats_for_user(pool: &PgPool, user_id: UserId) -> Result<Vec<ChatSummary>> {
    let chats = sqlx::query_as::<_, ChatSummary>(
        r#"
        SELECT
            c.id,
            CASE WHEN c.user1_id = $1 THEN c.user2_id ELSE c.user1_id END AS counterparty_id,
            c.created_at,
            lm.content AS last_message,
            lm.created_at AS last_message_at,
            lm.sender_id AS last_message_user,
            (
                SELECT COUNT(*) FROM messages m
                WHERE m.chat_id = c.id AND m.receiver_id = $1 AND m.is_read = FALSE
            ) AS unread_count
        FROM chats c
        LEFT JOIN LATERAL (
            SELECT content, created_at, sender_id
            FROM messages
            WHERE chat_id = c.id
            ORDER BY id DESC
            LIMIT 1
        ) lm ON TRUE
        WHERE c.user1_id = $1 OR c.user2_id = $1
        ORDER BY COALESCE(lm.created_at, c.created_at) DESC, c.id DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(chats)
}
