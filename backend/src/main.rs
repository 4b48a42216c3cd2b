use std::sync::Arc;

use matchchat::{
    auth::Authenticator,
    constants::SESSION_SWEEP_INTERVAL,
    create_router,
    db::{self, DatabaseConfig, MemoryStore, PgStore, Store},
    get_db_pool,
    realtime::{start_heartbeat, InMemorySessionStore, RedisSessionStore, SessionStore},
    utils::{self, PeriodicTask, SessionBackend},
    AppState, Config,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_logging();

    let config = Config::from_env()?;
    let (store, auth) = open_store(&config).await?;

    let mut background: Vec<PeriodicTask> = Vec::new();
    let sessions: Arc<dyn SessionStore> = match &config.session_backend {
        SessionBackend::Memory => {
            let sessions = Arc::new(InMemorySessionStore::new());
            background.push(sessions.start_sweeper(SESSION_SWEEP_INTERVAL));
            sessions
        }
        SessionBackend::Redis { url } => {
            info!("Using Redis for session tokens");
            Arc::new(RedisSessionStore::new(url)?)
        }
    };

    let port = config.port;
    let heartbeat_interval = config.heartbeat_interval;
    let state = AppState::new(config, store, auth, sessions);
    background.push(start_heartbeat(state.hub.clone(), heartbeat_interval));

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&format!("0.0.0.0:{}", port)).await?;
    info!("Server running on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in background {
        let name = task.name();
        task.stop().await;
        info!(task = name, "Background task stopped");
    }

    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<(Arc<dyn Store>, Arc<dyn Authenticator>)> {
    if config.database_url.is_some() {
        let db_config = DatabaseConfig::from_env()?;
        let pool = get_db_pool(&db_config).await?;
        db::migrations::run_migrations(&pool).await?;
        let pg = Arc::new(PgStore::new(pool));
        let store: Arc<dyn Store> = pg.clone();
        let auth: Arc<dyn Authenticator> = pg;
        return Ok((store, auth));
    }

    warn!("DATABASE_URL not set, using the in-memory store; nothing survives a restart");
    let memory = Arc::new(MemoryStore::new());
    for (token, user_id) in &config.dev_access_tokens {
        memory.grant_access_token(token.clone(), *user_id).await;
    }
    let store: Arc<dyn Store> = memory.clone();
    let auth: Arc<dyn Authenticator> = memory;
    Ok((store, auth))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
