use futures::{SinkExt, StreamExt};
use matchchat::db::MemoryStore;
use matchchat::models::UserId;
use matchchat::realtime::InMemorySessionStore;
use matchchat::{create_router, AppState, Config};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ALICE: UserId = 1;
const BOB: UserId = 2;

struct TestServer {
    http: String,
    ws: String,
    state: AppState,
    client: reqwest::Client,
}

fn bearer(user_id: UserId) -> String {
    format!("access-token-{}", user_id)
}

async fn spawn_server(config: Config) -> TestServer {
    let store = Arc::new(MemoryStore::new());
    for user_id in [ALICE, BOB, 3] {
        store.grant_access_token(bearer(user_id), user_id).await;
    }
    let sessions = Arc::new(InMemorySessionStore::new());
    let state = AppState::new(config, store.clone(), store, sessions);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        http: format!("http://{}", addr),
        ws: format!("ws://{}", addr),
        state,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    async fn session_token(&self, user_id: UserId) -> String {
        let body: Value = self
            .client
            .post(format!("{}/ws/start", self.http))
            .bearer_auth(bearer(user_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["session_token"].as_str().unwrap().to_string()
    }

    async fn try_connect(&self, token: &str) -> Result<Socket, WsError> {
        let (socket, _) = connect_async(format!("{}/ws/chat?session={}", self.ws, token)).await?;
        Ok(socket)
    }

    /// Open a duplex connection and wait until the hub has registered it.
    async fn connect(&self, user_id: UserId) -> Socket {
        let token = self.session_token(user_id).await;
        let socket = self.try_connect(&token).await.unwrap();
        self.wait_for_presence(user_id, true).await;
        socket
    }

    /// Poll the hub until `user_id`'s presence matches `online`.
    async fn wait_for_presence(&self, user_id: UserId, online: bool) {
        for _ in 0..100 {
            if self.state.hub.is_online(user_id).await == online {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("user {} never became {}", user_id, if online { "online" } else { "offline" });
    }

    async fn post(&self, user_id: UserId, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{}", self.http, path))
            .bearer_auth(bearer(user_id))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, user_id: UserId, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}{}", self.http, path))
            .bearer_auth(bearer(user_id))
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }
}

/// Next JSON event, or None if nothing arrives within `wait`.
async fn next_event(socket: &mut Socket, wait: Duration) -> Option<Value> {
    loop {
        match tokio::time::timeout(wait, socket.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) | Err(_) => return None,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

async fn expect_closed(socket: &mut Socket) {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), socket.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return,
            Ok(Some(Ok(_))) => continue,
            Err(_) => panic!("connection was not closed"),
        }
    }
}

fn rejected_status(result: Result<Socket, WsError>) -> u16 {
    match result {
        Err(WsError::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("upgrade unexpectedly accepted"),
    }
}

const SHORT: Duration = Duration::from_millis(300);

#[tokio::test]
async fn health_reports_connections() {
    let server = spawn_server(Config::default()).await;
    let (status, body) = server.get(ALICE, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "connections": 0}));

    let _socket = server.connect(ALICE).await;
    let (_, body) = server.get(ALICE, "/health").await;
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn token_issue_requires_bearer() {
    let server = spawn_server(Config::default()).await;
    let response = server
        .client
        .post(format!("{}/ws/start", server.http))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = server
        .client
        .post(format!("{}/ws/start", server.http))
        .bearer_auth("not-a-real-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_token_is_single_use() {
    let server = spawn_server(Config::default()).await;
    let token = server.session_token(ALICE).await;

    let _socket = server.try_connect(&token).await.unwrap();
    assert_eq!(rejected_status(server.try_connect(&token).await), 401);
    assert_eq!(rejected_status(server.try_connect("bogus").await), 401);
}

#[tokio::test]
async fn expired_session_token_is_rejected() {
    let config = Config {
        session_token_ttl: Duration::from_millis(50),
        ..Config::default()
    };
    let server = spawn_server(config).await;
    let token = server.session_token(ALICE).await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(rejected_status(server.try_connect(&token).await), 401);
}

#[tokio::test]
async fn disallowed_origin_is_forbidden() {
    let config = Config {
        ws_allowed_origins: Some(vec!["https://app.example".to_string()]),
        ..Config::default()
    };
    let server = spawn_server(config).await;
    let token = server.session_token(ALICE).await;

    let mut request = format!("{}/ws/chat?session={}", server.ws, token)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://evil.example".parse().unwrap());
    let result = connect_async(request).await.map(|(socket, _)| socket);
    assert_eq!(rejected_status(result), 403);

    // The token was not consumed by the rejected attempt.
    assert!(server.try_connect(&token).await.is_ok());
}

#[tokio::test]
async fn mutual_like_pushes_one_match_to_each() {
    let server = spawn_server(Config::default()).await;
    let mut alice = server.connect(ALICE).await;
    let mut bob = server.connect(BOB).await;

    let (status, body) = server.post(ALICE, "/swipe", json!({"target_id": BOB, "action": "like"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "like");
    assert!(next_event(&mut alice, SHORT).await.is_none());

    let (_, body) = server.post(BOB, "/swipe", json!({"target_id": ALICE, "action": "like"})).await;
    assert_eq!(body["status"], "match");
    assert_eq!(body["content"], "It's a match with user 1!");
    let chat_id = body["chat_id"].as_i64().unwrap();

    let to_alice = next_event(&mut alice, SHORT).await.unwrap();
    assert_eq!(to_alice, json!({"type": "match", "chat_id": chat_id, "user_id": BOB, "content": "It's a match! 🎉"}));
    let to_bob = next_event(&mut bob, SHORT).await.unwrap();
    assert_eq!(to_bob["user_id"], ALICE);

    // A repeated like is still a match but announces nothing new.
    let (_, body) = server.post(BOB, "/swipe", json!({"target_id": ALICE, "action": "like"})).await;
    assert_eq!(body["status"], "match");
    assert!(next_event(&mut alice, SHORT).await.is_none());
    assert!(next_event(&mut bob, SHORT).await.is_none());

    let (_, chats) = server.get(ALICE, "/chats").await;
    assert_eq!(chats.as_array().unwrap().len(), 1);
    let (_, messages) = server.get(ALICE, &format!("/chat/messages/{}", chat_id)).await;
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["kind"], "system");

    let (_, body) = server.get(ALICE, "/matches").await;
    assert_eq!(body, json!({"matches": [BOB]}));
}

#[tokio::test]
async fn swipe_validation() {
    let server = spawn_server(Config::default()).await;
    let (status, _) = server.post(ALICE, "/swipe", json!({"target_id": ALICE, "action": "like"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server.post(ALICE, "/swipe", json!({"target_id": BOB, "action": "superlike"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn typing_and_delivered_are_relayed() {
    let server = spawn_server(Config::default()).await;
    let mut alice = server.connect(ALICE).await;
    let mut bob = server.connect(BOB).await;

    alice
        .send(Message::Text(r#"{"type":"typing","chat_id":9,"receiver_id":2}"#.into()))
        .await
        .unwrap();
    let event = next_event(&mut bob, SHORT).await.unwrap();
    assert_eq!(event, json!({"type": "typing", "chat_id": 9, "user_id": ALICE}));

    bob.send(Message::Text(r#"{"type":"delivered","chat_id":9,"receiver_id":1,"message_id":4}"#.into()))
        .await
        .unwrap();
    let event = next_event(&mut alice, SHORT).await.unwrap();
    assert_eq!(event, json!({"type": "delivered", "chat_id": 9, "user_id": BOB, "message_id": 4}));

    // Unknown kinds are ignored and the connection stays up.
    alice.send(Message::Text(r#"{"type":"presence"}"#.into())).await.unwrap();
    alice
        .send(Message::Text(r#"{"type":"typing","chat_id":9,"receiver_id":2}"#.into()))
        .await
        .unwrap();
    assert!(next_event(&mut bob, SHORT).await.is_some());
}

#[tokio::test]
async fn malformed_frame_ends_the_connection() {
    let server = spawn_server(Config::default()).await;
    let mut alice = server.connect(ALICE).await;

    alice.send(Message::Text("definitely not json".into())).await.unwrap();
    expect_closed(&mut alice).await;
    server.wait_for_presence(ALICE, false).await;
}

#[tokio::test]
async fn reconnect_supersedes_previous_connection() {
    let server = spawn_server(Config::default()).await;
    let mut first = server.connect(ALICE).await;

    let token = server.session_token(ALICE).await;
    let mut second = server.try_connect(&token).await.unwrap();
    expect_closed(&mut first).await;
    assert_eq!(server.state.hub.client_count().await, 1);

    let (status, _) = server
        .post(BOB, "/messages/send", json!({"receiver_id": ALICE, "content": "still there?"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let event = next_event(&mut second, SHORT).await.unwrap();
    assert_eq!(event["type"], "message");
    assert_eq!(event["content"], "still there?");

    // The superseded connection's teardown did not evict the new one.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.state.hub.is_online(ALICE).await);
}

#[tokio::test]
async fn message_history_pages_backwards() {
    let server = spawn_server(Config::default()).await;

    let mut chat_id = 0;
    for i in 1..=30 {
        let (status, body) = server
            .post(ALICE, "/messages/send", json!({"receiver_id": BOB, "content": format!("message {}", i)}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        chat_id = body["chat_id"].as_i64().unwrap();
    }

    let contents = |page: &Value| -> Vec<String> {
        page.as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap().to_string())
            .collect()
    };

    let (_, latest) = server.get(BOB, &format!("/chat/messages/{}?limit=10", chat_id)).await;
    let expected: Vec<String> = (21..=30).map(|i| format!("message {}", i)).collect();
    assert_eq!(contents(&latest), expected);

    let oldest_id = latest[0]["id"].as_i64().unwrap();
    let (_, older) = server
        .get(BOB, &format!("/chat/messages/{}?limit=10&before_id={}", chat_id, oldest_id))
        .await;
    let expected: Vec<String> = (11..=20).map(|i| format!("message {}", i)).collect();
    assert_eq!(contents(&older), expected);

    let (status, _) = server
        .get(BOB, &format!("/chat/messages/{}?before_id=5&after_id=2", chat_id))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server.get(3, &format!("/chat/messages/{}", chat_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn read_receipts_reach_the_sender() {
    let server = spawn_server(Config::default()).await;
    let mut alice = server.connect(ALICE).await;

    let (_, first) = server
        .post(ALICE, "/messages/send", json!({"receiver_id": BOB, "content": "one"}))
        .await;
    let chat_id = first["chat_id"].as_i64().unwrap();
    let first_id = first["id"].as_i64().unwrap();
    server
        .post(ALICE, "/messages/send", json!({"receiver_id": BOB, "content": "two", "chat_id": chat_id}))
        .await;

    let (status, body) = server
        .post(BOB, "/messages/read", json!({"chat_id": chat_id, "message_ids": [first_id]}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 1);
    let event = next_event(&mut alice, SHORT).await.unwrap();
    assert_eq!(event, json!({"type": "read_messages", "chat_id": chat_id, "user_id": BOB, "message_id": [first_id]}));

    let (_, body) = server.post(BOB, "/chat/read", json!({"chat_id": chat_id})).await;
    assert_eq!(body["updated"], 1);
    let event = next_event(&mut alice, SHORT).await.unwrap();
    assert_eq!(event, json!({"type": "read_chat", "chat_id": chat_id, "user_id": BOB}));

    let (_, body) = server.post(BOB, "/chat/read", json!({"chat_id": chat_id})).await;
    assert_eq!(body["updated"], 0);

    let (status, _) = server
        .post(BOB, "/messages/read", json!({"chat_id": chat_id, "message_ids": []}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
