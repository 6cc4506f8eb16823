use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::constants::MAX_DESCRIPTION_LEN;
use crate::db::{
    self,
    notifications::NewNotification,
    tasks::{NewTask, TaskChanges},
    Db,
};
use crate::error::{AppError, Result};
use crate::models::{validate_resource_name, NotificationKind, Project, Task, TaskPriority, TaskStatus};
use crate::routes::nullable;
use crate::routes::notifications::notify;
use crate::routes::projects::load_project;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "nullable")]
    pub assignee_id: Option<Option<String>>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
}

fn validate_fields(title: Option<&str>, description: Option<&str>) -> Result<()> {
    if title.is_some_and(|t| !validate_resource_name(t)) {
        return Err(AppError::invalid("Task title must be 1-255 characters"));
    }
    if description.is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(AppError::invalid("Description is too long"));
    }
    Ok(())
}

/// Assignees must belong to the project's team
async fn check_assignee(db: &Db, project: &Project, assignee_id: &str) -> Result<()> {
    if db::teams::member_role(db, &project.team_id, assignee_id)
        .await?
        .is_none()
    {
        return Err(AppError::invalid("Assignee must be a member of the team"));
    }
    Ok(())
}

async fn notify_assignee(state: &AppState, task: &Task, assigner_id: &str, assigner_name: &str) {
    let Some(assignee_id) = task.assignee_id.as_deref() else {
        return;
    };
    if assignee_id == assigner_id {
        return;
    }
    let title = format!("{} assigned you \"{}\"", assigner_name, task.title);
    notify(
        state,
        NewNotification {
            user_id: assignee_id,
            kind: NotificationKind::TaskAssigned,
            title: &title,
            body: task.description.as_deref(),
            resource_type: Some("task"),
            resource_id: Some(&task.id),
        },
    )
    .await;
}

/// Load a task, checking the caller belongs to its project's team
async fn load_task(db: &Db, task_id: &str, user_id: &str) -> Result<(Task, Project)> {
    let task = db::tasks::find(db, task_id)
        .await?
        .ok_or(AppError::NotFound("Task"))?;
    let (project, _) = match load_project(db, &task.project_id, user_id).await {
        Ok(found) => found,
        Err(AppError::NotFound(_)) => return Err(AppError::NotFound("Task")),
        Err(e) => return Err(e),
    };
    Ok((task, project))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<Task>>> {
    load_project(&state.db, &project_id, user.id()).await?;
    let tasks = db::tasks::list_for_project(&state.db, &project_id, filter.status).await?;
    Ok(Json(tasks))
}

pub async fn create_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>)> {
    let (project, _) = load_project(&state.db, &project_id, user.id()).await?;
    validate_fields(Some(&payload.title), payload.description.as_deref())?;
    if let Some(assignee_id) = payload.assignee_id.as_deref() {
        check_assignee(&state.db, &project, assignee_id).await?;
    }

    let task = db::tasks::create(
        &state.db,
        NewTask {
            project_id: &project_id,
            title: payload.title.trim(),
            description: payload.description.as_deref(),
            priority: payload.priority.unwrap_or(TaskPriority::Medium),
            assignee_id: payload.assignee_id.as_deref(),
            created_by: user.id(),
            due_date: payload.due_date,
        },
    )
    .await?;

    notify_assignee(&state, &task, user.id(), &user.0.name).await;
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /api/tasks/assigned?status=todo
pub async fn list_assigned(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<Task>>> {
    let tasks = db::tasks::list_assigned(&state.db, user.id(), filter.status).await?;
    Ok(Json(tasks))
}

pub async fn get_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<Task>> {
    let (task, _) = load_task(&state.db, &task_id, user.id()).await?;
    Ok(Json(task))
}

/// Update any task field; status may move freely between states
pub async fn update_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
    Json(payload): Json<UpdateTaskRequest>,
) -> Result<Json<Task>> {
    let (before, project) = load_task(&state.db, &task_id, user.id()).await?;
    validate_fields(payload.title.as_deref(), payload.description.as_deref())?;
    if let Some(Some(assignee_id)) = payload.assignee_id.as_ref() {
        check_assignee(&state.db, &project, assignee_id).await?;
    }

    let task = db::tasks::update(
        &state.db,
        &task_id,
        TaskChanges {
            title: payload.title.as_deref().map(str::trim),
            description: payload.description.as_deref(),
            status: payload.status,
            priority: payload.priority,
            assignee_id: payload.assignee_id.as_ref().map(|a| a.as_deref()),
            due_date: payload.due_date,
        },
    )
    .await?;

    if task.assignee_id != before.assignee_id {
        notify_assignee(&state, &task, user.id(), &user.0.name).await;
    }
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> Result<StatusCode> {
    load_task(&state.db, &task_id, user.id()).await?;
    db::tasks::delete(&state.db, &task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
