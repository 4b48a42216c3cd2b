use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

/// Apply the swipes/chats/messages/sessions schema from `backend/migrations`.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate!("./migrations");
    info!("Applying {} schema migrations", migrator.iter().count());
    migrator
        .run(pool)
        .await
        .context("failed to apply schema migrations")?;
    Ok(())
}
