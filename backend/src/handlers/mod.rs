pub mod chats;
pub mod session;
pub mod swipes;
pub mod ws;

use axum::{
    http::{HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;
use crate::utils::config::parse_origin_list;

pub use chats::{list_chats, list_messages, mark_chat_read, mark_messages_read, send_message};
pub use session::{health_check, ws_start};
pub use swipes::{matches, reset_swipes, swipe};
pub use ws::ws_chat;

pub fn create_router(state: AppState) -> Router {
    let cors_layer = create_cors_layer(std::env::var("ALLOWED_ORIGINS").ok().as_deref());

    Router::new()
        .route("/health", get(health_check))
        // Duplex session
        .route("/ws/start", post(ws_start))
        .route("/ws/chat", get(ws_chat))
        // Swipes and matches
        .route("/swipe", post(swipe))
        .route("/swipes", delete(reset_swipes))
        .route("/matches", get(matches))
        // Chats and messages
        .route("/chats", get(list_chats))
        .route("/chat/messages/{chat_id}", get(list_messages))
        .route("/chat/read", post(mark_chat_read))
        .route("/messages/send", post(send_message))
        .route("/messages/read", post(mark_messages_read))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(state)
}

fn create_cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = allowed_origins
        .map(parse_origin_list)
        .unwrap_or_default()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        // Permissive for development
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}
