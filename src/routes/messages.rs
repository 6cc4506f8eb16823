use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::constants::{DEFAULT_MESSAGE_PAGE, MAX_MESSAGE_LEN, MAX_MESSAGE_PAGE};
use crate::db;
use crate::error::{AppError, Result};
use crate::models::ChatMessage;
use crate::routes::teams::require_member;
use crate::AppState;

/// Persist a chat message and broadcast it to the team room
///
/// Shared by the REST endpoint and the `chat_message` WebSocket frame.
pub async fn post_team_message(
    state: &AppState,
    team_id: &str,
    sender_id: &str,
    content: &str,
) -> Result<ChatMessage> {
    require_member(&state.db, team_id, sender_id).await?;

    let content = content.trim();
    if content.is_empty() || content.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::invalid(format!(
            "Message must be 1-{MAX_MESSAGE_LEN} characters"
        )));
    }

    let message = db::messages::insert(&state.db, team_id, sender_id, content).await?;
    state.hub.broadcast_chat(message.clone()).await;
    Ok(message)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Only messages with a smaller id (older) than this
    pub before: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// GET /api/teams/{id}/messages?before=<id>&limit=<n>
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(team_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>> {
    require_member(&state.db, &team_id, user.id()).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_MESSAGE_PAGE)
        .clamp(1, MAX_MESSAGE_PAGE);
    let messages = db::messages::history(&state.db, &team_id, query.before, limit).await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(team_id): Path<String>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>)> {
    let message = post_team_message(&state, &team_id, user.id(), &payload.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
