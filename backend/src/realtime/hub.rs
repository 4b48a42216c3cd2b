//! Registry of live duplex connections, at most one per user.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, RwLock};
use tokio::time::{self, Instant};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::OUTBOUND_BUFFER_SIZE;
use crate::models::UserId;
use super::events::PushEvent;

/// Work for the task that owns a connection's write half.
#[derive(Debug)]
pub enum Outbound {
    Text(String),
    /// Write a liveness probe and report whether the write succeeded.
    Probe(oneshot::Sender<bool>),
    /// Send a normal-closure frame and stop writing.
    Close,
}

struct HandleInner {
    conn_id: Uuid,
    user_id: UserId,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    opened_at: Instant,
    /// Millis since `opened_at` of the last inbound frame.
    last_seen_ms: AtomicU64,
}

/// Cheap, cloneable reference to one live connection.
///
/// The hub only ever talks to the connection through its outbound queue, so
/// no socket I/O happens while the registry lock is held.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiving end its writer task drains.
    pub fn new(user_id: UserId) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let handle = Self {
            inner: Arc::new(HandleInner {
                conn_id: Uuid::new_v4(),
                user_id,
                tx,
                cancel: CancellationToken::new(),
                opened_at: Instant::now(),
                last_seen_ms: AtomicU64::new(0),
            }),
        };
        (handle, rx)
    }

    pub fn conn_id(&self) -> Uuid {
        self.inner.conn_id
    }

    pub fn user_id(&self) -> UserId {
        self.inner.user_id
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        let now = self.inner.opened_at.elapsed().as_millis() as u64;
        self.inner.last_seen_ms.store(now, Ordering::Relaxed);
    }

    /// Time since the last inbound frame (or since open, if none yet).
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.inner.last_seen_ms.load(Ordering::Relaxed));
        self.inner.opened_at.elapsed().saturating_sub(last)
    }

    /// Queue a text frame. False when the connection is closing or its
    /// buffer is full; the push is dropped in both cases.
    pub fn push_text(&self, text: String) -> bool {
        match self.inner.tx.try_send(Outbound::Text(text)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    user_id = self.inner.user_id,
                    conn_id = %self.inner.conn_id,
                    "Outbound buffer full, dropping push"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the writer to emit a probe and wait up to `deadline` for the
    /// write to complete.
    pub async fn probe(&self, deadline: Duration) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.inner.tx.try_send(Outbound::Probe(ack_tx)).is_err() {
            return false;
        }
        matches!(time::timeout(deadline, ack_rx).await, Ok(Ok(true)))
    }

    /// Signal the connection to shut down with a normal closure. Idempotent.
    pub fn close(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        let _ = self.inner.tx.try_send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once `close` has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.inner.conn_id == other.inner.conn_id
    }
}

#[derive(Default)]
pub struct Hub {
    connections: RwLock<HashMap<UserId, ConnectionHandle>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` the user's only live connection. A superseded
    /// connection is closed after the lock is released and returned.
    pub async fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user_id = handle.user_id();
        let conn_id = handle.conn_id();
        let previous = {
            let mut connections = self.connections.write().await;
            connections.insert(user_id, handle)
        };

        if let Some(old) = &previous {
            info!(user_id, conn_id = %conn_id, old_conn_id = %old.conn_id(), "Superseding existing connection");
            old.close();
        } else {
            info!(user_id, conn_id = %conn_id, "Connection registered");
        }
        previous
    }

    /// Remove the user's entry only if it is still `conn_id`, so a late
    /// teardown of a superseded connection cannot evict its replacement.
    pub async fn unregister(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.conn_id() == conn_id => {
                connections.remove(&user_id);
                debug!(user_id, conn_id = %conn_id, "Connection unregistered");
                true
            }
            _ => false,
        }
    }

    /// Remove and close a connection the heartbeat judged dead.
    pub async fn evict(&self, handle: &ConnectionHandle) -> bool {
        let removed = {
            let mut connections = self.connections.write().await;
            match connections.get(&handle.user_id()) {
                Some(current) if current.same_connection(handle) => {
                    connections.remove(&handle.user_id());
                    true
                }
                _ => false,
            }
        };
        handle.close();
        removed
    }

    pub async fn get(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.connections.read().await.get(&user_id).cloned()
    }

    /// Push an event to the user's live connection, if any.
    ///
    /// Returns whether the event was handed to the connection's writer.
    /// An offline user is a normal outcome, not an error.
    pub async fn send(&self, user_id: UserId, event: &PushEvent) -> bool {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(user_id, kind = event.kind(), "Failed to encode push event: {}", e);
                return false;
            }
        };
        self.send_text(user_id, payload).await
    }

    pub async fn send_text(&self, user_id: UserId, payload: String) -> bool {
        let Some(handle) = self.get(user_id).await else {
            debug!(user_id, "Recipient offline, push skipped");
            return false;
        };
        handle.push_text(payload)
    }

    /// Copy of every live handle, taken under the read lock.
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn client_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }
}
