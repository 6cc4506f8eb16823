use chrono::Utc;

use super::{new_id, Db};
use crate::error::Result;
use crate::models::UserRecord;

pub async fn insert(db: &Db, email: &str, name: &str, password_hash: &str) -> Result<UserRecord> {
    let now = Utc::now();
    let record = sqlx::query_as::<_, UserRecord>(
        "INSERT INTO users (id, email, name, password_hash, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new_id())
    .bind(email)
    .bind(name)
    .bind(password_hash)
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await?;
    Ok(record)
}

pub async fn find_by_email(db: &Db, email: &str) -> Result<Option<UserRecord>> {
    let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(db)
        .await?;
    Ok(record)
}

pub async fn find_by_id(db: &Db, id: &str) -> Result<Option<UserRecord>> {
    let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(record)
}

pub async fn update_profile(
    db: &Db,
    id: &str,
    name: Option<&str>,
    password_hash: Option<&str>,
) -> Result<UserRecord> {
    let record = sqlx::query_as::<_, UserRecord>(
        "UPDATE users
         SET name = COALESCE(?, name),
             password_hash = COALESCE(?, password_hash),
             updated_at = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(name)
    .bind(password_hash)
    .bind(Utc::now())
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(record)
}
