use chrono::Utc;

use super::{new_id, Db};
use crate::error::Result;
use crate::models::{Document, DocumentSummary, DocumentUpdate};

const SUMMARY_COLUMNS: &str = "id, title, owner_id, folder_id, created_at, updated_at";

pub async fn create(
    db: &Db,
    owner_id: &str,
    title: &str,
    content: &str,
    folder_id: Option<&str>,
) -> Result<Document> {
    let now = Utc::now();
    let document = sqlx::query_as::<_, Document>(
        "INSERT INTO documents (id, title, content, owner_id, folder_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new_id())
    .bind(title)
    .bind(content)
    .bind(owner_id)
    .bind(folder_id)
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await?;
    Ok(document)
}

pub async fn find(db: &Db, id: &str) -> Result<Option<Document>> {
    let document = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(document)
}

pub async fn list_in_folder(db: &Db, folder_id: &str) -> Result<Vec<DocumentSummary>> {
    let documents = sqlx::query_as::<_, DocumentSummary>(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM documents WHERE folder_id = ? ORDER BY title COLLATE NOCASE"
    ))
    .bind(folder_id)
    .fetch_all(db)
    .await?;
    Ok(documents)
}

pub async fn list_root(db: &Db, owner_id: &str) -> Result<Vec<DocumentSummary>> {
    let documents = sqlx::query_as::<_, DocumentSummary>(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM documents
         WHERE owner_id = ? AND folder_id IS NULL
         ORDER BY updated_at DESC"
    ))
    .bind(owner_id)
    .fetch_all(db)
    .await?;
    Ok(documents)
}

/// Update title, content and/or location; `folder_id` of `Some(None)` moves to the root
pub async fn update(
    db: &Db,
    id: &str,
    title: Option<&str>,
    content: Option<&str>,
    folder_id: Option<Option<&str>>,
) -> Result<Document> {
    let document = sqlx::query_as::<_, Document>(
        "UPDATE documents
         SET title = COALESCE(?, title),
             content = COALESCE(?, content),
             folder_id = CASE WHEN ? THEN ? ELSE folder_id END,
             updated_at = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(title)
    .bind(content)
    .bind(folder_id.is_some())
    .bind(folder_id.flatten())
    .bind(Utc::now())
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(document)
}

/// Delete a document with its shares; persisted deltas cascade
pub async fn delete(db: &Db, id: &str) -> Result<()> {
    let mut tx = db.begin().await?;
    sqlx::query("DELETE FROM shares WHERE resource_type = 'document' AND resource_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Persisted realtime deltas in arrival order
pub async fn updates(db: &Db, document_id: &str) -> Result<Vec<DocumentUpdate>> {
    let updates = sqlx::query_as::<_, DocumentUpdate>(
        "SELECT * FROM document_updates WHERE document_id = ? ORDER BY id",
    )
    .bind(document_id)
    .fetch_all(db)
    .await?;
    Ok(updates)
}

/// Append a batch of deltas and optionally replace the content snapshot
///
/// Returns `false` when the document no longer exists.
pub async fn append_updates(
    db: &Db,
    document_id: &str,
    deltas: &[String],
    content: Option<&str>,
) -> Result<bool> {
    let now = Utc::now();
    let mut tx = db.begin().await?;

    let touched = sqlx::query(
        "UPDATE documents SET content = COALESCE(?, content), updated_at = ? WHERE id = ?",
    )
    .bind(content)
    .bind(now)
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    if touched.rows_affected() == 0 {
        return Ok(false);
    }

    for delta in deltas {
        sqlx::query(
            "INSERT INTO document_updates (document_id, update_data, created_at) VALUES (?, ?, ?)",
        )
        .bind(document_id)
        .bind(delta)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}
