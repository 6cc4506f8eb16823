use chrono::Utc;

use super::{new_id, Db};
use crate::error::Result;
use crate::models::{Team, TeamMember, TeamRole, TeamSummary};

/// Create a team and enrol its creator as owner
pub async fn create(db: &Db, owner_id: &str, name: &str, description: Option<&str>) -> Result<Team> {
    let now = Utc::now();
    let mut tx = db.begin().await?;

    let team = sqlx::query_as::<_, Team>(
        "INSERT INTO teams (id, name, description, owner_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new_id())
    .bind(name)
    .bind(description)
    .bind(owner_id)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO team_members (team_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)")
        .bind(&team.id)
        .bind(owner_id)
        .bind(TeamRole::Owner)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(team)
}

pub async fn find(db: &Db, team_id: &str) -> Result<Option<Team>> {
    let team = sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = ?")
        .bind(team_id)
        .fetch_optional(db)
        .await?;
    Ok(team)
}

/// Teams the user belongs to, with their role and member counts
pub async fn list_for_user(db: &Db, user_id: &str) -> Result<Vec<TeamSummary>> {
    let teams = sqlx::query_as::<_, TeamSummary>(
        "SELECT t.id, t.name, t.description, t.owner_id, m.role, t.created_at,
                (SELECT COUNT(*) FROM team_members c WHERE c.team_id = t.id) AS member_count
         FROM teams t
         JOIN team_members m ON m.team_id = t.id
         WHERE m.user_id = ?
         ORDER BY t.name COLLATE NOCASE",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(teams)
}

pub async fn update(
    db: &Db,
    team_id: &str,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<Team> {
    let team = sqlx::query_as::<_, Team>(
        "UPDATE teams
         SET name = COALESCE(?, name),
             description = COALESCE(?, description),
             updated_at = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(name)
    .bind(description)
    .bind(Utc::now())
    .bind(team_id)
    .fetch_one(db)
    .await?;
    Ok(team)
}

/// Delete a team; members, projects, tasks, chat and team shares cascade
pub async fn delete(db: &Db, team_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM teams WHERE id = ?")
        .bind(team_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Role of `user_id` in `team_id`, or `None` for non-members
pub async fn member_role(db: &Db, team_id: &str, user_id: &str) -> Result<Option<TeamRole>> {
    let role = sqlx::query_scalar::<_, TeamRole>(
        "SELECT role FROM team_members WHERE team_id = ? AND user_id = ?",
    )
    .bind(team_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(role)
}

pub async fn members(db: &Db, team_id: &str) -> Result<Vec<TeamMember>> {
    let members = sqlx::query_as::<_, TeamMember>(
        "SELECT m.team_id, m.user_id, u.name, u.email, m.role, m.joined_at
         FROM team_members m
         JOIN users u ON u.id = m.user_id
         WHERE m.team_id = ?
         ORDER BY m.joined_at, u.name",
    )
    .bind(team_id)
    .fetch_all(db)
    .await?;
    Ok(members)
}

pub async fn member_ids(db: &Db, team_id: &str) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>("SELECT user_id FROM team_members WHERE team_id = ?")
        .bind(team_id)
        .fetch_all(db)
        .await?;
    Ok(ids)
}

/// Add a member; a duplicate membership surfaces as a unique violation (409)
pub async fn add_member(db: &Db, team_id: &str, user_id: &str, role: TeamRole) -> Result<()> {
    sqlx::query("INSERT INTO team_members (team_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)")
        .bind(team_id)
        .bind(user_id)
        .bind(role)
        .bind(Utc::now())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn set_member_role(db: &Db, team_id: &str, user_id: &str, role: TeamRole) -> Result<bool> {
    let result = sqlx::query("UPDATE team_members SET role = ? WHERE team_id = ? AND user_id = ?")
        .bind(role)
        .bind(team_id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn remove_member(db: &Db, team_id: &str, user_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM team_members WHERE team_id = ? AND user_id = ?")
        .bind(team_id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}
