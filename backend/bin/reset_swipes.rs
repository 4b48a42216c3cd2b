use anyhow::Result;
use clap::{Arg, Command};
use matchchat::db::{DatabaseConfig, PgStore, Store};
use matchchat::models::UserId;
use matchchat::{get_db_pool, utils};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    utils::init_logging();

    let matches = Command::new("reset-swipes")
        .about("Delete every swipe decision a user has made")
        .arg(
            Arg::new("user")
                .long("user")
                .help("Id of the user whose swipes are removed")
                .required(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("confirm")
                .long("confirm")
                .help("Confirm the deletion (without it the command only reports)")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let user_id: UserId = *matches
        .get_one::<i64>("user")
        .ok_or_else(|| anyhow::anyhow!("--user is required"))?;
    let confirm = matches.get_flag("confirm");

    let db_config = DatabaseConfig::from_env()?;
    let pool = get_db_pool(&db_config).await?;
    info!("Connected to database");

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM swipes WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await?;
    info!(user_id, "User has {} swipe decisions", existing);

    if !confirm {
        warn!("Deletion not confirmed. Use --confirm to remove them.");
        return Ok(());
    }

    let store = PgStore::new(pool);
    let removed = store.clear_swipes(user_id).await?;
    info!(user_id, "Removed {} swipe decisions", removed);

    Ok(())
}
