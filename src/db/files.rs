use chrono::Utc;

use super::{new_id, Db};
use crate::error::Result;
use crate::models::FileRecord;

pub struct NewFile<'a> {
    pub name: &'a str,
    pub mime_type: &'a str,
    pub size_bytes: i64,
    pub storage_key: &'a str,
    pub owner_id: &'a str,
    pub folder_id: Option<&'a str>,
}

pub async fn insert(db: &Db, file: NewFile<'_>) -> Result<FileRecord> {
    let now = Utc::now();
    let record = sqlx::query_as::<_, FileRecord>(
        "INSERT INTO files (id, name, mime_type, size_bytes, storage_key, owner_id, folder_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new_id())
    .bind(file.name)
    .bind(file.mime_type)
    .bind(file.size_bytes)
    .bind(file.storage_key)
    .bind(file.owner_id)
    .bind(file.folder_id)
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await?;
    Ok(record)
}

pub async fn find(db: &Db, id: &str) -> Result<Option<FileRecord>> {
    let record = sqlx::query_as::<_, FileRecord>("SELECT * FROM files WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(record)
}

pub async fn list_in_folder(db: &Db, folder_id: &str) -> Result<Vec<FileRecord>> {
    let files = sqlx::query_as::<_, FileRecord>(
        "SELECT * FROM files WHERE folder_id = ? ORDER BY name COLLATE NOCASE",
    )
    .bind(folder_id)
    .fetch_all(db)
    .await?;
    Ok(files)
}

pub async fn list_root(db: &Db, owner_id: &str) -> Result<Vec<FileRecord>> {
    let files = sqlx::query_as::<_, FileRecord>(
        "SELECT * FROM files WHERE owner_id = ? AND folder_id IS NULL ORDER BY name COLLATE NOCASE",
    )
    .bind(owner_id)
    .fetch_all(db)
    .await?;
    Ok(files)
}

/// Rename and/or move a file; `folder_id` of `Some(None)` moves it to the root
pub async fn update(
    db: &Db,
    id: &str,
    name: Option<&str>,
    folder_id: Option<Option<&str>>,
) -> Result<FileRecord> {
    let record = sqlx::query_as::<_, FileRecord>(
        "UPDATE files
         SET name = COALESCE(?, name),
             folder_id = CASE WHEN ? THEN ? ELSE folder_id END,
             updated_at = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(name)
    .bind(folder_id.is_some())
    .bind(folder_id.flatten())
    .bind(Utc::now())
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(record)
}

/// Delete a file row together with its shares
pub async fn delete(db: &Db, id: &str) -> Result<()> {
    let mut tx = db.begin().await?;
    sqlx::query("DELETE FROM shares WHERE resource_type = 'file' AND resource_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM files WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}
