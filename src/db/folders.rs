use chrono::Utc;

use super::{new_id, Db};
use crate::constants::MAX_FOLDER_DEPTH;
use crate::error::Result;
use crate::models::Folder;

pub async fn create(db: &Db, owner_id: &str, name: &str, parent_id: Option<&str>) -> Result<Folder> {
    let now = Utc::now();
    let folder = sqlx::query_as::<_, Folder>(
        "INSERT INTO folders (id, name, owner_id, parent_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new_id())
    .bind(name)
    .bind(owner_id)
    .bind(parent_id)
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await?;
    Ok(folder)
}

pub async fn find(db: &Db, id: &str) -> Result<Option<Folder>> {
    let folder = sqlx::query_as::<_, Folder>("SELECT * FROM folders WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(folder)
}

/// Child folders of `parent_id`
pub async fn list_children(db: &Db, parent_id: &str) -> Result<Vec<Folder>> {
    let folders = sqlx::query_as::<_, Folder>(
        "SELECT * FROM folders WHERE parent_id = ? ORDER BY name COLLATE NOCASE",
    )
    .bind(parent_id)
    .fetch_all(db)
    .await?;
    Ok(folders)
}

/// Top-level folders owned by `owner_id`
pub async fn list_root(db: &Db, owner_id: &str) -> Result<Vec<Folder>> {
    let folders = sqlx::query_as::<_, Folder>(
        "SELECT * FROM folders WHERE owner_id = ? AND parent_id IS NULL ORDER BY name COLLATE NOCASE",
    )
    .bind(owner_id)
    .fetch_all(db)
    .await?;
    Ok(folders)
}

/// Ancestor chain of a folder, nearest first, including the folder itself
pub async fn ancestors(db: &Db, folder_id: &str) -> Result<Vec<Folder>> {
    let folders = sqlx::query_as::<_, Folder>(
        "WITH RECURSIVE chain(id, depth) AS (
             SELECT id, 0 FROM folders WHERE id = ?
             UNION ALL
             SELECT f.parent_id, chain.depth + 1
             FROM folders f JOIN chain ON f.id = chain.id
             WHERE f.parent_id IS NOT NULL AND chain.depth < ?
         )
         SELECT f.* FROM chain JOIN folders f ON f.id = chain.id ORDER BY chain.depth",
    )
    .bind(folder_id)
    .bind(MAX_FOLDER_DEPTH as i64)
    .fetch_all(db)
    .await?;
    Ok(folders)
}

/// Levels of folders below `folder_id` (0 for a folder without subfolders)
pub async fn subtree_height(db: &Db, folder_id: &str) -> Result<usize> {
    let height: i64 = sqlx::query_scalar(
        "WITH RECURSIVE tree(id, depth) AS (
             SELECT id, 0 FROM folders WHERE id = ?
             UNION ALL
             SELECT f.id, tree.depth + 1
             FROM folders f JOIN tree ON f.parent_id = tree.id
             WHERE tree.depth < ?
         )
         SELECT COALESCE(MAX(depth), 0) FROM tree",
    )
    .bind(folder_id)
    .bind(MAX_FOLDER_DEPTH as i64)
    .fetch_one(db)
    .await?;
    Ok(usize::try_from(height).unwrap_or(0))
}

/// Rename and/or move a folder; `parent_id` of `Some(None)` moves it to the root
pub async fn update(
    db: &Db,
    id: &str,
    name: Option<&str>,
    parent_id: Option<Option<&str>>,
) -> Result<Folder> {
    let folder = sqlx::query_as::<_, Folder>(
        "UPDATE folders
         SET name = COALESCE(?, name),
             parent_id = CASE WHEN ? THEN ? ELSE parent_id END,
             updated_at = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(name)
    .bind(parent_id.is_some())
    .bind(parent_id.flatten())
    .bind(Utc::now())
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(folder)
}

/// Storage keys of every file inside the folder subtree
pub async fn subtree_storage_keys(db: &Db, folder_id: &str) -> Result<Vec<String>> {
    let keys = sqlx::query_scalar::<_, String>(
        "WITH RECURSIVE tree(id) AS (
             SELECT id FROM folders WHERE id = ?
             UNION
             SELECT f.id FROM folders f JOIN tree ON f.parent_id = tree.id
         )
         SELECT storage_key FROM files WHERE folder_id IN (SELECT id FROM tree)",
    )
    .bind(folder_id)
    .fetch_all(db)
    .await?;
    Ok(keys)
}

/// Delete a folder subtree and every share that pointed into it
///
/// Files, documents and subfolders cascade through foreign keys; shares are
/// polymorphic and are removed explicitly in the same transaction.
pub async fn delete_tree(db: &Db, folder_id: &str) -> Result<()> {
    let mut tx = db.begin().await?;

    sqlx::query(
        "WITH RECURSIVE tree(id) AS (
             SELECT id FROM folders WHERE id = ?1
             UNION
             SELECT f.id FROM folders f JOIN tree ON f.parent_id = tree.id
         )
         DELETE FROM shares WHERE
             (resource_type = 'folder' AND resource_id IN (SELECT id FROM tree))
          OR (resource_type = 'file' AND resource_id IN
                 (SELECT id FROM files WHERE folder_id IN (SELECT id FROM tree)))
          OR (resource_type = 'document' AND resource_id IN
                 (SELECT id FROM documents WHERE folder_id IN (SELECT id FROM tree)))",
    )
    .bind(folder_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM folders WHERE id = ?")
        .bind(folder_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
