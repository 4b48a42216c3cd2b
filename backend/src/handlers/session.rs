use axum::{extract::State, response::Json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{auth::AuthUser, constants::token_log_prefix, error::AppResult, state::AppState};

#[derive(Debug, Serialize)]
pub struct SessionTokenResponse {
    pub session_token: String,
}

/// Exchange the caller's bearer credential for a one-time duplex token.
pub async fn ws_start(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<SessionTokenResponse>> {
    let session_token = state
        .sessions
        .issue(user_id, state.config.session_token_ttl)
        .await?;
    debug!(user_id, token = token_log_prefix(&session_token), "Issued session token");

    Ok(Json(SessionTokenResponse { session_token }))
}

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.hub.client_count().await,
    }))
}
