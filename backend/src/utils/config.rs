use anyhow::Result;
use std::env;
use std::time::Duration;
use crate::constants::{DEFAULT_SERVER_PORT, HEARTBEAT_INTERVAL_SECS, SESSION_TOKEN_TTL_SECS};
use crate::models::UserId;

/// Which backend holds one-time session tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBackend {
    Memory,
    Redis { url: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub port: u16,
    pub session_backend: SessionBackend,
    pub session_token_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub ws_allowed_origins: Option<Vec<String>>,
    /// Bearer tokens pre-registered with the in-memory authenticator.
    /// Ignored when a database is configured.
    pub dev_access_tokens: Vec<(String, UserId)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let session_backend = match env::var("SESSION_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => SessionBackend::Memory,
            "redis" => SessionBackend::Redis {
                url: env::var("REDIS_URL")
                    .map_err(|_| anyhow::anyhow!("REDIS_URL must be set when SESSION_BACKEND=redis"))?,
            },
            other => anyhow::bail!("Unknown SESSION_BACKEND '{}', expected 'memory' or 'redis'", other),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            port: env::var("PORT")
                .unwrap_or_else(|_| DEFAULT_SERVER_PORT.to_string())
                .parse()
                .unwrap_or(DEFAULT_SERVER_PORT),
            session_backend,
            session_token_ttl: Duration::from_secs(secs_from_env("SESSION_TOKEN_TTL_SECS", SESSION_TOKEN_TTL_SECS)),
            heartbeat_interval: Duration::from_secs(secs_from_env("HEARTBEAT_INTERVAL_SECS", HEARTBEAT_INTERVAL_SECS)),
            ws_allowed_origins: env::var("WS_ALLOWED_ORIGINS")
                .ok()
                .map(|raw| parse_origin_list(&raw))
                .filter(|origins| !origins.is_empty()),
            dev_access_tokens: match env::var("DEV_ACCESS_TOKENS") {
                Ok(raw) => parse_access_tokens(&raw)?,
                Err(_) => Vec::new(),
            },
        })
    }

    /// Whether an upgrade request carrying `origin` may open a duplex connection.
    /// Requests without an Origin header (native clients) are always allowed.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match (&self.ws_allowed_origins, origin) {
            (None, _) | (_, None) => true,
            (Some(allowed), Some(origin)) => allowed.iter().any(|o| o == origin),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            port: DEFAULT_SERVER_PORT,
            session_backend: SessionBackend::Memory,
            session_token_ttl: Duration::from_secs(SESSION_TOKEN_TTL_SECS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            ws_allowed_origins: None,
            dev_access_tokens: Vec::new(),
        }
    }
}

fn secs_from_env(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

pub(crate) fn parse_origin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `token:user_id` pairs separated by commas.
fn parse_access_tokens(raw: &str) -> Result<Vec<(String, UserId)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (token, user_id) = entry
                .rsplit_once(':')
                .ok_or_else(|| anyhow::anyhow!("DEV_ACCESS_TOKENS entry '{}' is not token:user_id", entry))?;
            let user_id = user_id
                .trim()
                .parse::<UserId>()
                .map_err(|_| anyhow::anyhow!("DEV_ACCESS_TOKENS entry '{}' has a non-numeric user id", entry))?;
            Ok((token.trim().to_string(), user_id))
        })
        .collect()
}
