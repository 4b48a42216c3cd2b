//! One-time session tokens that let an authenticated client open a duplex
//! connection without re-sending its bearer credential.
//!
//! Two interchangeable backends implement [`SessionStore`]: an in-process map
//! with a periodic sweep, and Redis relying on native key expiry.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tracing::debug;

use crate::constants::{REDIS_SESSION_KEY_PREFIX, SESSION_TOKEN_BYTES};
use crate::models::UserId;
use crate::utils::PeriodicTask;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session backend unavailable: {0}")]
    Backend(String),

    #[error("corrupt session entry: {0}")]
    Malformed(String),
}

impl From<redis::RedisError> for SessionError {
    fn from(e: redis::RedisError) -> Self {
        SessionError::Backend(e.to_string())
    }
}

/// Issue/redeem/revoke contract shared by all token backends.
///
/// `redeem` consumes the token: among any number of concurrent callers only
/// one gets `Some`. Expired tokens are never redeemable.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn issue(&self, user_id: UserId, ttl: Duration) -> Result<String, SessionError>;

    async fn redeem(&self, token: &str) -> Result<Option<UserId>, SessionError>;

    async fn revoke(&self, token: &str) -> Result<(), SessionError>;
}

/// 256 bits from the thread-local CSPRNG, hex encoded.
pub fn generate_token() -> String {
    hex::encode(rand::random::<[u8; SESSION_TOKEN_BYTES]>())
}

// In-process backend ----------------------------------------------------------

struct Entry {
    user_id: UserId,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Spawn the background sweep that bounds memory held by unredeemed tokens.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> PeriodicTask {
        let store = Arc::clone(self);
        PeriodicTask::spawn("session-sweeper", every, move || {
            let store = Arc::clone(&store);
            async move {
                let purged = store.sweep_expired().await;
                if purged > 0 {
                    debug!(purged, "Swept expired session tokens");
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn issue(&self, user_id: UserId, ttl: Duration) -> Result<String, SessionError> {
        let token = generate_token();
        let entry = Entry {
            user_id,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(token.clone(), entry);
        Ok(token)
    }

    async fn redeem(&self, token: &str) -> Result<Option<UserId>, SessionError> {
        // Removal under the lock is what makes redemption single-use; an
        // expired entry is purged by the same removal.
        let entry = self.entries.lock().await.remove(token);
        Ok(entry
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.user_id))
    }

    async fn revoke(&self, token: &str) -> Result<(), SessionError> {
        self.entries.lock().await.remove(token);
        Ok(())
    }
}

// Redis backend ---------------------------------------------------------------

/// Redis-backed store: `SET .. PX` on issue, `GETDEL` on redeem (Redis >= 6.2).
pub struct RedisSessionStore {
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
}

impl RedisSessionStore {
    pub fn new(redis_url: &str) -> Result<Self, SessionError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, SessionError> {
        let conn = self
            .conn
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await?;
        Ok(conn.clone())
    }

    fn key(token: &str) -> String {
        format!("{}{}", REDIS_SESSION_KEY_PREFIX, token)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn issue(&self, user_id: UserId, ttl: Duration) -> Result<String, SessionError> {
        let token = generate_token();
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let mut conn = self.connection().await?;

        let _: () = redis::cmd("SET")
            .arg(Self::key(&token))
            .arg(user_id)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(token)
    }

    async fn redeem(&self, token: &str) -> Result<Option<UserId>, SessionError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(Self::key(token))
            .query_async(&mut conn)
            .await?;

        value
            .map(|raw| {
                raw.parse::<UserId>()
                    .map_err(|_| SessionError::Malformed(format!("non-numeric user id '{}'", raw)))
            })
            .transpose()
    }

    async fn revoke(&self, token: &str) -> Result<(), SessionError> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(Self::key(token))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
