use crate::models::UserId;
use anyhow::Result;
use sqlx::PgPool;

/// Resolve a bearer access token issued by the auth service.
pub async fn get_user_for_access_token(pool: &PgPool, access_token: &str) -> Result<Option<UserId>> {
    let user_id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT user_id
        FROM sessions
        WHERE access_token = $1
        AND access_expires > NOW()
        "#,
    )
    .bind(access_token)
    .fetch_optional(pool)
    .await?;

    Ok(user_id)
}
