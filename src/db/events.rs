use chrono::{DateTime, Utc};

use super::{new_id, Db};
use crate::error::Result;
use crate::models::Event;

pub struct EventFields<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub location: Option<&'a str>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

pub async fn create(
    db: &Db,
    created_by: &str,
    team_id: Option<&str>,
    fields: EventFields<'_>,
) -> Result<Event> {
    let now = Utc::now();
    let event = sqlx::query_as::<_, Event>(
        "INSERT INTO events (id, team_id, created_by, title, description, location, starts_at, ends_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new_id())
    .bind(team_id)
    .bind(created_by)
    .bind(fields.title)
    .bind(fields.description)
    .bind(fields.location)
    .bind(fields.starts_at)
    .bind(fields.ends_at)
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await?;
    Ok(event)
}

pub async fn find(db: &Db, id: &str) -> Result<Option<Event>> {
    let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(event)
}

/// Personal events of the user plus events of their teams overlapping `[from, to]`
pub async fn list_visible(
    db: &Db,
    user_id: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<Vec<Event>> {
    let events = sqlx::query_as::<_, Event>(
        "SELECT * FROM events
         WHERE ((team_id IS NULL AND created_by = ?1)
                OR team_id IN (SELECT team_id FROM team_members WHERE user_id = ?1))
           AND (?2 IS NULL OR ends_at >= ?2)
           AND (?3 IS NULL OR starts_at <= ?3)
         ORDER BY starts_at",
    )
    .bind(user_id)
    .bind(from)
    .bind(to)
    .fetch_all(db)
    .await?;
    Ok(events)
}

/// Replace the editable fields of an event
pub async fn update(db: &Db, id: &str, fields: EventFields<'_>) -> Result<Event> {
    let event = sqlx::query_as::<_, Event>(
        "UPDATE events
         SET title = ?, description = ?, location = ?, starts_at = ?, ends_at = ?, updated_at = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(fields.title)
    .bind(fields.description)
    .bind(fields.location)
    .bind(fields.starts_at)
    .bind(fields.ends_at)
    .bind(Utc::now())
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(event)
}

pub async fn delete(db: &Db, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM events WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
