use chrono::Utc;

use super::Db;
use crate::error::Result;
use crate::models::ChatMessage;

pub async fn insert(db: &Db, team_id: &str, sender_id: &str, content: &str) -> Result<ChatMessage> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO messages (team_id, sender_id, content, created_at) VALUES (?, ?, ?, ?)
         RETURNING id",
    )
    .bind(team_id)
    .bind(sender_id)
    .bind(content)
    .bind(Utc::now())
    .fetch_one(db)
    .await?;

    let message = sqlx::query_as::<_, ChatMessage>(
        "SELECT m.id, m.team_id, m.sender_id, u.name AS sender_name, m.content, m.created_at
         FROM messages m JOIN users u ON u.id = m.sender_id
         WHERE m.id = ?",
    )
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(message)
}

/// A page of team history, newest first, strictly older than `before` when given
pub async fn history(
    db: &Db,
    team_id: &str,
    before: Option<i64>,
    limit: i64,
) -> Result<Vec<ChatMessage>> {
    let messages = sqlx::query_as::<_, ChatMessage>(
        "SELECT m.id, m.team_id, m.sender_id, u.name AS sender_name, m.content, m.created_at
         FROM messages m JOIN users u ON u.id = m.sender_id
         WHERE m.team_id = ? AND (? IS NULL OR m.id < ?)
         ORDER BY m.id DESC
         LIMIT ?",
    )
    .bind(team_id)
    .bind(before)
    .bind(before)
    .bind(limit)
    .fetch_all(db)
    .await?;
    Ok(messages)
}
