use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::constants::{ERR_INSUFFICIENT_PERMISSION, MAX_DESCRIPTION_LEN};
use crate::db::{self, events::EventFields, Db};
use crate::error::{AppError, Result};
use crate::models::{validate_resource_name, Event, TeamRole};
use crate::routes::teams::require_member;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Team calendar; omitted for a personal event
    pub team_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

/// `GET /api/events?from=...&to=...` (RFC 3339)
#[derive(Debug, Deserialize)]
pub struct EventWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

fn validate_fields(fields: &EventFields<'_>) -> Result<()> {
    if !validate_resource_name(fields.title) {
        return Err(AppError::invalid("Event title must be 1-255 characters"));
    }
    if fields
        .description
        .is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN)
    {
        return Err(AppError::invalid("Description is too long"));
    }
    if !Event::validate_window(fields.starts_at, fields.ends_at) {
        return Err(AppError::invalid("Event must not end before it starts"));
    }
    Ok(())
}

/// Load an event visible to the caller, with their team role for team events
async fn load_event(db: &Db, event_id: &str, user_id: &str) -> Result<(Event, Option<TeamRole>)> {
    let event = db::events::find(db, event_id)
        .await?
        .ok_or(AppError::NotFound("Event"))?;

    let role = match event.team_id.as_deref() {
        Some(team_id) => db::teams::member_role(db, team_id, user_id).await?,
        None => None,
    };
    let visible = role.is_some() || (event.team_id.is_none() && event.created_by == user_id);
    if !visible {
        return Err(AppError::NotFound("Event"));
    }
    Ok((event, role))
}

pub async fn create_event(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Event>)> {
    let fields = EventFields {
        title: payload.title.trim(),
        description: payload.description.as_deref(),
        location: payload.location.as_deref(),
        starts_at: payload.starts_at,
        ends_at: payload.ends_at,
    };
    validate_fields(&fields)?;
    if let Some(team_id) = payload.team_id.as_deref() {
        require_member(&state.db, team_id, user.id()).await?;
    }

    let event = db::events::create(&state.db, user.id(), payload.team_id.as_deref(), fields).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// Personal events plus events of the caller's teams overlapping the window
pub async fn list_events(
    State(state): State<AppState>,
    user: AuthUser,
    Query(window): Query<EventWindow>,
) -> Result<Json<Vec<Event>>> {
    if let (Some(from), Some(to)) = (window.from, window.to) {
        if to < from {
            return Err(AppError::invalid("`to` must not be before `from`"));
        }
    }
    let events = db::events::list_visible(&state.db, user.id(), window.from, window.to).await?;
    Ok(Json(events))
}

pub async fn get_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<String>,
) -> Result<Json<Event>> {
    let (event, _) = load_event(&state.db, &event_id, user.id()).await?;
    Ok(Json(event))
}

/// Edit an event; any member may edit team events
pub async fn update_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<String>,
    Json(payload): Json<UpdateEventRequest>,
) -> Result<Json<Event>> {
    let (current, _) = load_event(&state.db, &event_id, user.id()).await?;

    let fields = EventFields {
        title: payload.title.as_deref().map(str::trim).unwrap_or(&current.title),
        description: payload
            .description
            .as_deref()
            .or(current.description.as_deref()),
        location: payload.location.as_deref().or(current.location.as_deref()),
        starts_at: payload.starts_at.unwrap_or(current.starts_at),
        ends_at: payload.ends_at.unwrap_or(current.ends_at),
    };
    validate_fields(&fields)?;

    let event = db::events::update(&state.db, &event_id, fields).await?;
    Ok(Json(event))
}

/// Delete an event (its creator, or an owner/admin of its team)
pub async fn delete_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<String>,
) -> Result<StatusCode> {
    let (event, role) = load_event(&state.db, &event_id, user.id()).await?;
    let is_creator = event.created_by == user.id();
    if !is_creator && !role.is_some_and(TeamRole::can_manage) {
        return Err(AppError::forbidden(ERR_INSUFFICIENT_PERMISSION));
    }

    db::events::delete(&state.db, &event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
