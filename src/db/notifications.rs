use chrono::Utc;

use super::{new_id, Db};
use crate::error::Result;
use crate::models::{Notification, NotificationKind};

pub struct NewNotification<'a> {
    pub user_id: &'a str,
    pub kind: NotificationKind,
    pub title: &'a str,
    pub body: Option<&'a str>,
    pub resource_type: Option<&'a str>,
    pub resource_id: Option<&'a str>,
}

pub async fn insert(db: &Db, notification: NewNotification<'_>) -> Result<Notification> {
    let record = sqlx::query_as::<_, Notification>(
        "INSERT INTO notifications (id, user_id, kind, title, body, resource_type, resource_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new_id())
    .bind(notification.user_id)
    .bind(notification.kind)
    .bind(notification.title)
    .bind(notification.body)
    .bind(notification.resource_type)
    .bind(notification.resource_id)
    .bind(Utc::now())
    .fetch_one(db)
    .await?;
    Ok(record)
}

pub async fn list(db: &Db, user_id: &str, unread_only: bool, limit: i64) -> Result<Vec<Notification>> {
    let notifications = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications
         WHERE user_id = ? AND (NOT ? OR read_at IS NULL)
         ORDER BY created_at DESC
         LIMIT ?",
    )
    .bind(user_id)
    .bind(unread_only)
    .bind(limit)
    .fetch_all(db)
    .await?;
    Ok(notifications)
}

pub async fn unread_count(db: &Db, user_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read_at IS NULL",
    )
    .bind(user_id)
    .fetch_one(db)
    .await?;
    Ok(count)
}

/// Mark one notification read; `None` when it does not belong to the user
pub async fn mark_read(db: &Db, user_id: &str, id: &str) -> Result<Option<Notification>> {
    let notification = sqlx::query_as::<_, Notification>(
        "UPDATE notifications SET read_at = COALESCE(read_at, ?)
         WHERE id = ? AND user_id = ?
         RETURNING *",
    )
    .bind(Utc::now())
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(notification)
}

pub async fn mark_all_read(db: &Db, user_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE notifications SET read_at = ? WHERE user_id = ? AND read_at IS NULL",
    )
    .bind(Utc::now())
    .bind(user_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete(db: &Db, user_id: &str, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}
