use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{header::ORIGIN, HeaderMap},
    response::Response,
};
use std::collections::HashMap;
use tracing::{error, warn};

use crate::{
    constants::{token_log_prefix, MAX_INBOUND_FRAME_BYTES, SESSION_QUERY_PARAM},
    error::{AppError, AppResult},
    realtime::serve_connection,
    state::AppState,
};

/// Duplex upgrade. The one-time token is redeemed before the upgrade so a
/// bad token never gets a promoted connection.
pub async fn ws_chat(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    if !state.config.origin_allowed(origin) {
        warn!(origin = ?origin, "Rejected duplex upgrade from disallowed origin");
        return Err(AppError::Forbidden("origin not allowed".to_string()));
    }

    let token = params
        .get(SESSION_QUERY_PARAM)
        .filter(|token| !token.is_empty())
        .cloned()
        .ok_or_else(|| AppError::unauthorized("missing session token"))?;

    let user_id = match state.sessions.redeem(&token).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            warn!(token = token_log_prefix(&token), "Rejected unknown, expired or used session token");
            return Err(AppError::unauthorized("invalid or expired session token"));
        }
        Err(e) => {
            // Never promote on a backend failure.
            error!(token = token_log_prefix(&token), "Session store failed during redeem: {}", e);
            return Err(AppError::unauthorized("session token could not be verified"));
        }
    };

    let hub = state.hub.clone();
    let sessions = state.sessions.clone();
    Ok(ws
        .max_message_size(MAX_INBOUND_FRAME_BYTES)
        .on_upgrade(move |socket| serve_connection(socket, user_id, token, hub, sessions)))
}
