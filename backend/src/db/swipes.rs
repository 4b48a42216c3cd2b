use crate::models::{SwipeAction, UserId};
use anyhow::Result;
use sqlx::PgPool;

/// Record `user_id`'s decision about `target_id`, replacing any earlier one.
pub async fn upsert_swipe(pool: &PgPool, user_id: UserId, target_id: UserId, action: SwipeAction) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO swipes (user_id, target_id, action)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, target_id)
        DO UPDATE SET action = EXCLUDED.action, created_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(target_id)
    .bind(action.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn has_liked(pool: &PgPool, user_id: UserId, target_id: UserId) -> Result<bool> {
    let liked = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM swipes WHERE user_id = $1 AND target_id = $2 AND action = 'like')",
    )
    .bind(user_id)
    .bind(target_id)
    .fetch_one(pool)
    .await?;

    Ok(liked)
}

pub async fn delete_swipes_for_user(pool: &PgPool, user_id: UserId) -> Result<u64> {
    let result = sqlx::query("DELETE FROM swipes WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Users that `user_id` likes and who like `user_id` back.
pub async fn get_mutual_likes(pool: &PgPool, user_id: UserId) -> Result<Vec<UserId>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT l1.target_id
        FROM swipes l1
        JOIN swipes l2 ON l2.user_id = l1.target_id AND l2.target_id = l1.user_id
        WHERE l1.user_id = $1
        AND l1.action = 'like'
        AND l2.action = 'like'
        ORDER BY l1.target_id ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}
