use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::db::{self, notifications::NewNotification};
use crate::error::{AppError, Result};
use crate::models::Notification;
use crate::AppState;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

/// Persist a notification and push it to the recipient's live connections
///
/// Failures are logged and swallowed: the action that triggered the
/// notification has already succeeded.
pub async fn notify(state: &AppState, notification: NewNotification<'_>) {
    match db::notifications::insert(&state.db, notification).await {
        Ok(saved) => state.hub.notify(saved).await,
        Err(e) => tracing::error!("Failed to store notification: {}", e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkedRead {
    pub updated: u64,
}

/// GET /api/notifications?unread=true&limit=50
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Notification>>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let notifications =
        db::notifications::list(&state.db, user.id(), query.unread, limit).await?;
    Ok(Json(notifications))
}

pub async fn unread_count(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UnreadCount>> {
    let unread_count = db::notifications::unread_count(&state.db, user.id()).await?;
    Ok(Json(UnreadCount { unread_count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Notification>> {
    let notification = db::notifications::mark_read(&state.db, user.id(), &id)
        .await?
        .ok_or(AppError::NotFound("Notification"))?;
    Ok(Json(notification))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<MarkedRead>> {
    let updated = db::notifications::mark_all_read(&state.db, user.id()).await?;
    Ok(Json(MarkedRead { updated }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if !db::notifications::delete(&state.db, user.id(), &id).await? {
        return Err(AppError::NotFound("Notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}
