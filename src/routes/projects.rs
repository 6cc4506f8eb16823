use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::constants::{ERR_INSUFFICIENT_PERMISSION, MAX_DESCRIPTION_LEN};
use crate::db::{self, projects::ProjectChanges, Db};
use crate::error::{AppError, Result};
use crate::models::{validate_resource_name, Project, ProjectStatus, TeamRole};
use crate::routes::teams::require_member;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
}

/// Load a project and the caller's role in its team
pub async fn load_project(db: &Db, project_id: &str, user_id: &str) -> Result<(Project, TeamRole)> {
    let project = db::projects::find(db, project_id)
        .await?
        .ok_or(AppError::NotFound("Project"))?;
    // Outsiders get 404 for projects rather than learning the team id
    let role = match require_member(db, &project.team_id, user_id).await {
        Ok(role) => role,
        Err(AppError::Forbidden(_)) => return Err(AppError::NotFound("Project")),
        Err(e) => return Err(e),
    };
    Ok((project, role))
}

fn validate_fields(name: Option<&str>, description: Option<&str>) -> Result<()> {
    if name.is_some_and(|n| !validate_resource_name(n)) {
        return Err(AppError::invalid("Project name must be 1-255 characters"));
    }
    if description.is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(AppError::invalid("Description is too long"));
    }
    Ok(())
}

pub async fn list_projects(
    State(state): State<AppState>,
    user: AuthUser,
    Path(team_id): Path<String>,
    Query(filter): Query<ProjectFilter>,
) -> Result<Json<Vec<Project>>> {
    require_member(&state.db, &team_id, user.id()).await?;
    let projects = db::projects::list_for_team(&state.db, &team_id, filter.status).await?;
    Ok(Json(projects))
}

pub async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(team_id): Path<String>,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>)> {
    require_member(&state.db, &team_id, user.id()).await?;
    validate_fields(Some(&payload.name), payload.description.as_deref())?;

    let project = db::projects::create(
        &state.db,
        &team_id,
        user.id(),
        payload.name.trim(),
        payload.description.as_deref(),
        payload.due_date,
    )
    .await?;

    tracing::info!("Project {} created in team {}", project.id, team_id);
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> Result<Json<Project>> {
    let (project, _) = load_project(&state.db, &project_id, user.id()).await?;
    Ok(Json(project))
}

pub async fn update_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
    Json(payload): Json<UpdateProjectRequest>,
) -> Result<Json<Project>> {
    load_project(&state.db, &project_id, user.id()).await?;
    validate_fields(payload.name.as_deref(), payload.description.as_deref())?;

    let project = db::projects::update(
        &state.db,
        &project_id,
        ProjectChanges {
            name: payload.name.as_deref().map(str::trim),
            description: payload.description.as_deref(),
            status: payload.status,
            due_date: payload.due_date,
        },
    )
    .await?;
    Ok(Json(project))
}

/// Delete a project and its tasks (team owner/admin or the project's creator)
pub async fn delete_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> Result<StatusCode> {
    let (project, role) = load_project(&state.db, &project_id, user.id()).await?;
    let is_creator = project.created_by.as_deref() == Some(user.id());
    if !role.can_manage() && !is_creator {
        return Err(AppError::forbidden(ERR_INSUFFICIENT_PERMISSION));
    }

    db::projects::delete(&state.db, &project_id).await?;
    tracing::info!("Project {} deleted by {}", project_id, user.id());
    Ok(StatusCode::NO_CONTENT)
}
