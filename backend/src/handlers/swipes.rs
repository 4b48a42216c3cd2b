use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{SwipeAction, UserId},
    services::SwipeOutcome,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SwipeRequest {
    pub target_id: UserId,
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub removed: u64,
}

#[derive(Debug, Serialize)]
pub struct MatchesResponse {
    pub matches: Vec<UserId>,
}

pub async fn swipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<SwipeRequest>,
) -> AppResult<Json<SwipeOutcome>> {
    let action: SwipeAction = req
        .action
        .parse()
        .map_err(|_| AppError::bad_request("invalid action"))?;

    let outcome = state.matcher.decide(user_id, req.target_id, action).await?;
    Ok(Json(outcome))
}

pub async fn reset_swipes(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<ResetResponse>> {
    let removed = state.matcher.reset(user_id).await?;
    Ok(Json(ResetResponse { removed }))
}

pub async fn matches(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<MatchesResponse>> {
    let matches = state.matcher.matches(user_id).await?;
    Ok(Json(MatchesResponse { matches }))
}
