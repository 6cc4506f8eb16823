use chrono::Utc;

use super::{new_id, Db};
use crate::error::Result;
use crate::models::{Permission, ReceivedShare, ResourceType, Share};

/// Who a share grants access to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient<'a> {
    User(&'a str),
    Team(&'a str),
}

/// Result of an idempotent share upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    Created,
    /// An existing share was found; `changed` tells whether its level moved
    Updated { changed: bool },
}

/// Grant `permission` on a resource, reusing the existing share for the same recipient
///
/// The insert and the level change happen in one statement, so concurrent
/// grants to the same recipient settle on a single row.
pub async fn upsert(
    db: &Db,
    resource_type: ResourceType,
    resource_id: &str,
    owner_id: &str,
    recipient: Recipient<'_>,
    permission: Permission,
) -> Result<(Share, ShareOutcome)> {
    let (user_id, team_id, conflict_target) = match recipient {
        Recipient::User(id) => (
            Some(id),
            None,
            "(resource_type, resource_id, shared_with_user_id) WHERE shared_with_user_id IS NOT NULL",
        ),
        Recipient::Team(id) => (
            None,
            Some(id),
            "(resource_type, resource_id, shared_with_team_id) WHERE shared_with_team_id IS NOT NULL",
        ),
    };
    let id = new_id();
    let now = Utc::now();

    let sql = format!(
        "INSERT INTO shares (id, resource_type, resource_id, owner_id, shared_with_user_id,
                             shared_with_team_id, permission, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT {conflict_target} DO UPDATE
         SET permission = excluded.permission, updated_at = excluded.updated_at
         WHERE shares.permission <> excluded.permission
         RETURNING *"
    );
    let written = sqlx::query_as::<_, Share>(&sql)
        .bind(&id)
        .bind(resource_type)
        .bind(resource_id)
        .bind(owner_id)
        .bind(user_id)
        .bind(team_id)
        .bind(permission)
        .bind(now)
        .bind(now)
        .fetch_optional(db)
        .await?;

    match written {
        Some(share) if share.id == id => Ok((share, ShareOutcome::Created)),
        Some(share) => Ok((share, ShareOutcome::Updated { changed: true })),
        // Same level already granted: nothing was written
        None => {
            let share = sqlx::query_as::<_, Share>(
                "SELECT * FROM shares
                 WHERE resource_type = ? AND resource_id = ?
                   AND shared_with_user_id IS ? AND shared_with_team_id IS ?",
            )
            .bind(resource_type)
            .bind(resource_id)
            .bind(user_id)
            .bind(team_id)
            .fetch_one(db)
            .await?;
            Ok((share, ShareOutcome::Updated { changed: false }))
        }
    }
}

pub async fn find(db: &Db, id: &str) -> Result<Option<Share>> {
    let share = sqlx::query_as::<_, Share>("SELECT * FROM shares WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(share)
}

pub async fn list_for_resource(
    db: &Db,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<Vec<Share>> {
    let shares = sqlx::query_as::<_, Share>(
        "SELECT * FROM shares WHERE resource_type = ? AND resource_id = ? ORDER BY created_at",
    )
    .bind(resource_type)
    .bind(resource_id)
    .fetch_all(db)
    .await?;
    Ok(shares)
}

/// Shares granted to the user directly or through any team they belong to
pub async fn received(db: &Db, user_id: &str) -> Result<Vec<ReceivedShare>> {
    let shares = sqlx::query_as::<_, ReceivedShare>(
        "SELECT s.id, s.resource_type, s.resource_id, s.owner_id, s.shared_with_team_id,
                s.permission, s.created_at,
                CASE s.resource_type
                    WHEN 'file' THEN (SELECT name FROM files WHERE id = s.resource_id)
                    WHEN 'document' THEN (SELECT title FROM documents WHERE id = s.resource_id)
                    WHEN 'folder' THEN (SELECT name FROM folders WHERE id = s.resource_id)
                END AS resource_name
         FROM shares s
         WHERE s.owner_id <> ?1
           AND (s.shared_with_user_id = ?1
                OR s.shared_with_team_id IN (SELECT team_id FROM team_members WHERE user_id = ?1))
         ORDER BY s.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(shares)
}

/// Every permission level the user holds on a resource through shares
pub async fn granted_permissions(
    db: &Db,
    user_id: &str,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<Vec<Permission>> {
    let levels = sqlx::query_scalar::<_, Permission>(
        "SELECT permission FROM shares
         WHERE resource_type = ?1 AND resource_id = ?2
           AND (shared_with_user_id = ?3
                OR shared_with_team_id IN (SELECT team_id FROM team_members WHERE user_id = ?3))",
    )
    .bind(resource_type)
    .bind(resource_id)
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(levels)
}

pub async fn update_permission(db: &Db, id: &str, permission: Permission) -> Result<Share> {
    let share = sqlx::query_as::<_, Share>(
        "UPDATE shares SET permission = ?, updated_at = ? WHERE id = ? RETURNING *",
    )
    .bind(permission)
    .bind(Utc::now())
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(share)
}

pub async fn delete(db: &Db, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM shares WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
