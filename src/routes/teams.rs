use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::constants::{
    ERR_INSUFFICIENT_PERMISSION, ERR_NOT_TEAM_MEMBER, ERR_OWNER_ONLY, MAX_DESCRIPTION_LEN,
};
use crate::db::{self, notifications::NewNotification, Db};
use crate::error::{AppError, Result};
use crate::models::{NotificationKind, Team, TeamMember, TeamRole, TeamSummary, User};
use crate::routes::notifications::notify;
use crate::AppState;

/// Role of the caller in a team; 404 for unknown teams, 403 for outsiders
pub async fn require_member(db: &Db, team_id: &str, user_id: &str) -> Result<TeamRole> {
    if let Some(role) = db::teams::member_role(db, team_id, user_id).await? {
        return Ok(role);
    }
    if db::teams::find(db, team_id).await?.is_none() {
        return Err(AppError::NotFound("Team"));
    }
    Err(AppError::forbidden(ERR_NOT_TEAM_MEMBER))
}

/// Like [`require_member`] but only owners and admins pass
pub async fn require_manager(db: &Db, team_id: &str, user_id: &str) -> Result<TeamRole> {
    let role = require_member(db, team_id, user_id).await?;
    if !role.can_manage() {
        return Err(AppError::forbidden(ERR_INSUFFICIENT_PERMISSION));
    }
    Ok(role)
}

fn validate_description(description: Option<&str>) -> Result<()> {
    if description.is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(AppError::invalid("Description is too long"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTeamRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    pub role: Option<TeamRole>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub role: TeamRole,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDetails {
    #[serde(flatten)]
    pub team: Team,
    pub role: TeamRole,
    pub members: Vec<TeamMember>,
}

pub async fn create_team(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateTeamRequest>,
) -> Result<(StatusCode, Json<Team>)> {
    if !User::validate_name(&payload.name) {
        return Err(AppError::invalid("Team name must be 1-255 characters"));
    }
    validate_description(payload.description.as_deref())?;

    let team = db::teams::create(
        &state.db,
        user.id(),
        payload.name.trim(),
        payload.description.as_deref(),
    )
    .await?;

    tracing::info!("Team {} created by {}", team.id, user.id());
    Ok((StatusCode::CREATED, Json(team)))
}

pub async fn list_teams(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<TeamSummary>>> {
    Ok(Json(db::teams::list_for_user(&state.db, user.id()).await?))
}

pub async fn get_team(
    State(state): State<AppState>,
    user: AuthUser,
    Path(team_id): Path<String>,
) -> Result<Json<TeamDetails>> {
    let role = require_member(&state.db, &team_id, user.id()).await?;
    let team = db::teams::find(&state.db, &team_id)
        .await?
        .ok_or(AppError::NotFound("Team"))?;
    let members = db::teams::members(&state.db, &team_id).await?;
    Ok(Json(TeamDetails {
        team,
        role,
        members,
    }))
}

pub async fn update_team(
    State(state): State<AppState>,
    user: AuthUser,
    Path(team_id): Path<String>,
    Json(payload): Json<UpdateTeamRequest>,
) -> Result<Json<Team>> {
    require_manager(&state.db, &team_id, user.id()).await?;
    if let Some(name) = payload.name.as_deref() {
        if !User::validate_name(name) {
            return Err(AppError::invalid("Team name must be 1-255 characters"));
        }
    }
    validate_description(payload.description.as_deref())?;

    let team = db::teams::update(
        &state.db,
        &team_id,
        payload.name.as_deref().map(str::trim),
        payload.description.as_deref(),
    )
    .await?;
    Ok(Json(team))
}

/// Delete a team (owner only); projects, chat and team shares go with it
pub async fn delete_team(
    State(state): State<AppState>,
    user: AuthUser,
    Path(team_id): Path<String>,
) -> Result<StatusCode> {
    let role = require_member(&state.db, &team_id, user.id()).await?;
    if role != TeamRole::Owner {
        return Err(AppError::forbidden(ERR_OWNER_ONLY));
    }
    db::teams::delete(&state.db, &team_id).await?;
    state.hub.close_team(&team_id).await;
    tracing::info!("Team {} deleted by {}", team_id, user.id());
    Ok(StatusCode::NO_CONTENT)
}

/// Add a user by email; only the owner may add admins
pub async fn add_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path(team_id): Path<String>,
    Json(payload): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<Vec<TeamMember>>)> {
    let caller_role = require_manager(&state.db, &team_id, user.id()).await?;

    let role = payload.role.unwrap_or(TeamRole::Member);
    match role {
        TeamRole::Owner => return Err(AppError::invalid("A team has exactly one owner")),
        TeamRole::Admin if caller_role != TeamRole::Owner => {
            return Err(AppError::forbidden("Only the team owner can add admins"));
        }
        _ => {}
    }

    let email = User::normalize_email(&payload.email);
    let invitee = db::users::find_by_email(&state.db, &email)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    if db::teams::member_role(&state.db, &team_id, &invitee.id)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("User is already a member".to_string()));
    }
    db::teams::add_member(&state.db, &team_id, &invitee.id, role).await?;

    let team = db::teams::find(&state.db, &team_id)
        .await?
        .ok_or(AppError::NotFound("Team"))?;
    let title = format!("{} added you to {}", user.0.name, team.name);
    notify(
        &state,
        NewNotification {
            user_id: &invitee.id,
            kind: NotificationKind::TeamMemberAdded,
            title: &title,
            body: None,
            resource_type: Some("team"),
            resource_id: Some(&team_id),
        },
    )
    .await;

    tracing::info!("User {} joined team {} as {}", invitee.id, team_id, role.as_str());
    let members = db::teams::members(&state.db, &team_id).await?;
    Ok((StatusCode::CREATED, Json(members)))
}

/// Change a member's role (owner only); ownership cannot be granted or revoked
pub async fn update_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path((team_id, member_id)): Path<(String, String)>,
    Json(payload): Json<UpdateMemberRequest>,
) -> Result<Json<Vec<TeamMember>>> {
    let caller_role = require_member(&state.db, &team_id, user.id()).await?;
    if caller_role != TeamRole::Owner {
        return Err(AppError::forbidden("Only the team owner can change roles"));
    }
    if payload.role == TeamRole::Owner {
        return Err(AppError::invalid("Ownership cannot be transferred"));
    }

    match db::teams::member_role(&state.db, &team_id, &member_id).await? {
        None => return Err(AppError::NotFound("Team member")),
        Some(TeamRole::Owner) => {
            return Err(AppError::invalid("The team owner's role cannot change"));
        }
        Some(_) => {}
    }

    db::teams::set_member_role(&state.db, &team_id, &member_id, payload.role).await?;
    Ok(Json(db::teams::members(&state.db, &team_id).await?))
}

/// Remove a member, or leave the team when removing yourself
pub async fn remove_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path((team_id, member_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let caller_role = require_member(&state.db, &team_id, user.id()).await?;
    let target_role = db::teams::member_role(&state.db, &team_id, &member_id)
        .await?
        .ok_or(AppError::NotFound("Team member"))?;

    if target_role == TeamRole::Owner {
        return Err(AppError::invalid("The team owner cannot be removed"));
    }

    let leaving = member_id == user.id();
    let allowed = leaving
        || match caller_role {
            TeamRole::Owner => true,
            TeamRole::Admin => target_role == TeamRole::Member,
            TeamRole::Member => false,
        };
    if !allowed {
        return Err(AppError::forbidden(ERR_INSUFFICIENT_PERMISSION));
    }

    db::teams::remove_member(&state.db, &team_id, &member_id).await?;
    state.hub.remove_team_member(&team_id, &member_id).await;
    tracing::info!("User {} removed from team {}", member_id, team_id);
    Ok(StatusCode::NO_CONTENT)
}
