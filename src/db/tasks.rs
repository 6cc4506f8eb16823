use chrono::{DateTime, Utc};

use super::{new_id, Db};
use crate::error::Result;
use crate::models::{Task, TaskPriority, TaskStatus};

pub struct NewTask<'a> {
    pub project_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub priority: TaskPriority,
    pub assignee_id: Option<&'a str>,
    pub created_by: &'a str,
    pub due_date: Option<DateTime<Utc>>,
}

pub async fn create(db: &Db, task: NewTask<'_>) -> Result<Task> {
    let now = Utc::now();
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (id, project_id, title, description, status, priority, assignee_id, created_by, due_date, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new_id())
    .bind(task.project_id)
    .bind(task.title)
    .bind(task.description)
    .bind(TaskStatus::Todo)
    .bind(task.priority)
    .bind(task.assignee_id)
    .bind(task.created_by)
    .bind(task.due_date)
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await?;
    Ok(task)
}

pub async fn find(db: &Db, id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(task)
}

pub async fn list_for_project(
    db: &Db,
    project_id: &str,
    status: Option<TaskStatus>,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks
         WHERE project_id = ? AND (? IS NULL OR status = ?)
         ORDER BY created_at",
    )
    .bind(project_id)
    .bind(status)
    .bind(status)
    .fetch_all(db)
    .await?;
    Ok(tasks)
}

/// Tasks assigned to `user_id`, most urgent first
pub async fn list_assigned(db: &Db, user_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks
         WHERE assignee_id = ? AND (? IS NULL OR status = ?)
         ORDER BY CASE priority
                      WHEN 'urgent' THEN 0 WHEN 'high' THEN 1
                      WHEN 'medium' THEN 2 ELSE 3 END,
                  due_date IS NULL, due_date, created_at",
    )
    .bind(user_id)
    .bind(status)
    .bind(status)
    .fetch_all(db)
    .await?;
    Ok(tasks)
}

pub struct TaskChanges<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    /// `Some(None)` clears the assignee
    pub assignee_id: Option<Option<&'a str>>,
    pub due_date: Option<DateTime<Utc>>,
}

pub async fn update(db: &Db, id: &str, changes: TaskChanges<'_>) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks
         SET title = COALESCE(?, title),
             description = COALESCE(?, description),
             status = COALESCE(?, status),
             priority = COALESCE(?, priority),
             assignee_id = CASE WHEN ? THEN ? ELSE assignee_id END,
             due_date = COALESCE(?, due_date),
             updated_at = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(changes.title)
    .bind(changes.description)
    .bind(changes.status)
    .bind(changes.priority)
    .bind(changes.assignee_id.is_some())
    .bind(changes.assignee_id.flatten())
    .bind(changes.due_date)
    .bind(Utc::now())
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(task)
}

pub async fn delete(db: &Db, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
