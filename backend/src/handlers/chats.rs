use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{ChatId, ChatSummary, Message, MessageId, PageQuery, PageRequest},
    services::SendMessage,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ReadChatRequest {
    pub chat_id: ChatId,
}

#[derive(Debug, Deserialize)]
pub struct ReadMessagesRequest {
    pub chat_id: ChatId,
    #[serde(default)]
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Serialize)]
pub struct ReadResponse {
    pub updated: u64,
}

pub async fn list_chats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<ChatSummary>>> {
    Ok(Json(state.messenger.chats(user_id).await?))
}

/// `?limit=&before_id=&after_id=`; pages are always oldest-to-newest.
pub async fn list_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let page = PageRequest::try_from(query).map_err(AppError::BadRequest)?;
    Ok(Json(state.messenger.list(user_id, chat_id, page).await?))
}

pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<SendMessage>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let message = state.messenger.send(user_id, req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_chat_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<ReadChatRequest>,
) -> AppResult<Json<ReadResponse>> {
    let updated = state.messenger.mark_chat_read(user_id, req.chat_id).await?;
    Ok(Json(ReadResponse { updated }))
}

pub async fn mark_messages_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<ReadMessagesRequest>,
) -> AppResult<Json<ReadResponse>> {
    let updated = state
        .messenger
        .mark_messages_read(user_id, req.chat_id, req.message_ids)
        .await?;
    Ok(Json(ReadResponse { updated }))
}
