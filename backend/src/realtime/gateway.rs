//! Per-connection protocol loop for promoted duplex connections.

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::constants::{token_log_prefix, PROBE_WRITE_WAIT, WRITE_WAIT};
use crate::models::UserId;
use super::events::ClientFrame;
use super::hub::{ConnectionHandle, Hub, Outbound};
use super::session_store::SessionStore;

/// Why a connection's read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    ClosedByServer,
    ClientClosed,
    StreamEnded,
    ReadError,
    MalformedFrame,
}

/// Run an upgraded connection for `user_id` until it ends.
///
/// `token` is the already-redeemed session token; it is revoked once the
/// connection is registered so it can never be replayed.
pub async fn serve_connection(
    socket: WebSocket,
    user_id: UserId,
    token: String,
    hub: Arc<Hub>,
    sessions: Arc<dyn SessionStore>,
) {
    let (conn, outbound_rx) = ConnectionHandle::new(user_id);
    let conn_id = conn.conn_id();
    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(write_loop(sink, outbound_rx, conn.clone()));
    hub.register(conn.clone()).await;

    if let Err(e) = sessions.revoke(&token).await {
        warn!(user_id, token = token_log_prefix(&token), "Failed to revoke session token: {}", e);
    }

    let exit = read_loop(stream, &conn, &hub).await;
    info!(user_id, conn_id = %conn_id, reason = ?exit, "Connection closed");

    // Teardown runs whatever the exit reason.
    hub.unregister(user_id, conn_id).await;
    conn.close();
    match time::timeout(WRITE_WAIT, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(user_id, conn_id = %conn_id, "Writer task ended abnormally: {}", e),
        Err(_) => {
            // Dropping the task releases the socket's write half.
            warn!(user_id, conn_id = %conn_id, "Writer did not stop in time, aborting");
            writer.abort();
        }
    }
}

/// Sole owner of the socket's write half.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    conn: ConnectionHandle,
) {
    loop {
        let frame = tokio::select! {
            _ = conn.closed() => Outbound::Close,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match frame {
            Outbound::Text(text) => {
                let write = tokio::select! {
                    _ = conn.closed() => break,
                    write = time::timeout(WRITE_WAIT, sink.send(Message::Text(text.into()))) => write,
                };
                match write {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(user_id = conn.user_id(), "Write failed: {}", e);
                        break;
                    }
                    Err(_) => {
                        warn!(user_id = conn.user_id(), "Write timed out, peer is not reading");
                        break;
                    }
                }
            }
            Outbound::Probe(ack) => {
                let written = matches!(
                    time::timeout(PROBE_WRITE_WAIT, sink.send(Message::Ping(Bytes::new()))).await,
                    Ok(Ok(()))
                );
                let _ = ack.send(written);
                if !written {
                    break;
                }
            }
            Outbound::Close => {
                let close = CloseFrame {
                    code: close_code::NORMAL,
                    reason: "".into(),
                };
                let _ = time::timeout(PROBE_WRITE_WAIT, sink.send(Message::Close(Some(close)))).await;
                break;
            }
        }
    }

    // A dead writer means a dead connection; make sure the reader stops too.
    conn.close();
}

async fn read_loop(mut stream: SplitStream<WebSocket>, conn: &ConnectionHandle, hub: &Hub) -> Exit {
    loop {
        let next = tokio::select! {
            _ = conn.closed() => return Exit::ClosedByServer,
            next = stream.next() => next,
        };

        let message = match next {
            None => return Exit::StreamEnded,
            Some(Err(e)) => {
                debug!(user_id = conn.user_id(), "Read failed: {}", e);
                return Exit::ReadError;
            }
            Some(Ok(message)) => message,
        };
        conn.touch();

        let parsed = match &message {
            Message::Text(text) => serde_json::from_str::<ClientFrame>(text.as_str()),
            Message::Binary(bytes) => serde_json::from_slice::<ClientFrame>(bytes),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return Exit::ClientClosed,
        };

        match parsed {
            Ok(frame) => dispatch(frame, conn, hub).await,
            Err(e) => {
                warn!(user_id = conn.user_id(), "Malformed frame: {}", e);
                return Exit::MalformedFrame;
            }
        }
    }
}

async fn dispatch(frame: ClientFrame, conn: &ConnectionHandle, hub: &Hub) {
    let sender = conn.user_id();
    match frame.into_relay(sender) {
        Some((receiver, event)) => {
            let delivered = hub.send(receiver, &event).await;
            debug!(user_id = sender, receiver, kind = event.kind(), delivered, "Relayed frame");
        }
        None => debug!(user_id = sender, "Ignoring unrecognized frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::InMemorySessionStore;
    use axum::{extract::WebSocketUpgrade, routing::get, Router};
    use std::time::Duration;

    const USER: UserId = 1;

    /// Serve duplex connections for `USER`; each finished connection is
    /// reported on the returned channel.
    async fn spawn_gateway(hub: Arc<Hub>) -> (String, mpsc::UnboundedReceiver<UserId>) {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/ws",
            get(move |ws: WebSocketUpgrade| async move {
                ws.on_upgrade(move |socket| async move {
                    serve_connection(socket, USER, "already-redeemed".to_string(), hub, sessions).await;
                    let _ = done_tx.send(USER);
                })
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://{}/ws", addr), done_rx)
    }

    async fn registered(hub: &Hub, user_id: UserId) -> ConnectionHandle {
        for _ in 0..100 {
            if let Some(conn) = hub.get(user_id).await {
                return conn;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        panic!("user {} never registered", user_id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_evicting_a_stalled_reader_tears_the_connection_down() {
        let hub = Arc::new(Hub::new());
        let (url, mut finished) = spawn_gateway(hub.clone()).await;

        // Stays connected but never reads.
        let (_client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let conn = registered(&hub, USER).await;

        // Push until the socket backs up and the outbound queue stops draining.
        let chunk = "x".repeat(64 * 1024);
        let mut stalled = false;
        for _ in 0..5000 {
            if !conn.push_text(chunk.clone()) {
                time::sleep(Duration::from_millis(50)).await;
                if !conn.push_text(chunk.clone()) {
                    stalled = true;
                    break;
                }
            }
            tokio::task::yield_now().await;
        }
        assert!(stalled, "writer never backed up");

        assert!(hub.evict(&conn).await);
        let done = time::timeout(Duration::from_secs(2), finished.recv()).await;
        assert_eq!(done.ok().flatten(), Some(USER));
        assert!(!hub.is_online(USER).await);
    }

    #[tokio::test]
    async fn test_server_close_ends_the_connection() {
        let hub = Arc::new(Hub::new());
        let (url, mut finished) = spawn_gateway(hub.clone()).await;

        let (mut client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let conn = registered(&hub, USER).await;
        conn.close();

        let done = time::timeout(Duration::from_secs(2), finished.recv()).await;
        assert_eq!(done.ok().flatten(), Some(USER));
        loop {
            match time::timeout(Duration::from_secs(2), client.next()).await {
                Ok(Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => break,
                Ok(Some(Ok(_))) => continue,
                Err(_) => panic!("client never saw the close"),
            }
        }
    }
}
