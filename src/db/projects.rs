use chrono::{DateTime, Utc};

use super::{new_id, Db};
use crate::error::Result;
use crate::models::{Project, ProjectStatus};

pub async fn create(
    db: &Db,
    team_id: &str,
    created_by: &str,
    name: &str,
    description: Option<&str>,
    due_date: Option<DateTime<Utc>>,
) -> Result<Project> {
    let now = Utc::now();
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (id, team_id, name, description, status, created_by, due_date, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new_id())
    .bind(team_id)
    .bind(name)
    .bind(description)
    .bind(ProjectStatus::Active)
    .bind(created_by)
    .bind(due_date)
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await?;
    Ok(project)
}

pub async fn find(db: &Db, id: &str) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(project)
}

pub async fn list_for_team(
    db: &Db,
    team_id: &str,
    status: Option<ProjectStatus>,
) -> Result<Vec<Project>> {
    let projects = sqlx::query_as::<_, Project>(
        "SELECT * FROM projects
         WHERE team_id = ? AND (? IS NULL OR status = ?)
         ORDER BY created_at DESC",
    )
    .bind(team_id)
    .bind(status)
    .bind(status)
    .fetch_all(db)
    .await?;
    Ok(projects)
}

pub struct ProjectChanges<'a> {
    pub name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub status: Option<ProjectStatus>,
    pub due_date: Option<DateTime<Utc>>,
}

pub async fn update(db: &Db, id: &str, changes: ProjectChanges<'_>) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "UPDATE projects
         SET name = COALESCE(?, name),
             description = COALESCE(?, description),
             status = COALESCE(?, status),
             due_date = COALESCE(?, due_date),
             updated_at = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(changes.name)
    .bind(changes.description)
    .bind(changes.status)
    .bind(changes.due_date)
    .bind(Utc::now())
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(project)
}

pub async fn delete(db: &Db, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
