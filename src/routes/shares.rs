use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::db::{
    self,
    notifications::NewNotification,
    shares::{Recipient, ShareOutcome},
};
use crate::error::{AppError, Result};
use crate::models::{NotificationKind, Permission, ReceivedShare, ResourceType, Share, User};
use crate::permissions::{load_resource, require_access};
use crate::routes::notifications::notify;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareRequest {
    pub resource_type: ResourceType,
    pub resource_id: String,
    /// Share with a user, identified by email
    pub email: Option<String>,
    /// ...or with every member of a team
    pub team_id: Option<String>,
    pub permission: Permission,
}

#[derive(Debug, Deserialize)]
pub struct UpdateShareRequest {
    pub permission: Permission,
}

/// Share a resource with a user or a team (admin access required)
///
/// Sharing again with the same recipient updates the existing share instead
/// of creating a second one. Recipients are notified when a share is created
/// or its level changes.
pub async fn create_share(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateShareRequest>,
) -> Result<(StatusCode, Json<Share>)> {
    let kind = payload.resource_type;
    let resource_id = payload.resource_id.as_str();

    require_access(&state.db, user.id(), kind, resource_id, Permission::Admin).await?;
    let resource = load_resource(&state.db, kind, resource_id)
        .await?
        .ok_or(AppError::NotFound(kind.label()))?;

    let (recipient_id, to_team) = match (payload.email.as_deref(), payload.team_id.as_deref()) {
        (Some(email), None) => {
            let target = db::users::find_by_email(&state.db, &User::normalize_email(email))
                .await?
                .ok_or(AppError::NotFound("User"))?;
            if target.id == resource.owner_id {
                return Err(AppError::invalid("Cannot share a resource with its owner"));
            }
            if target.id == user.id() {
                return Err(AppError::invalid("Cannot share a resource with yourself"));
            }
            (target.id, false)
        }
        (None, Some(team_id)) => {
            if db::teams::find(&state.db, team_id).await?.is_none() {
                return Err(AppError::NotFound("Team"));
            }
            (team_id.to_string(), true)
        }
        _ => return Err(AppError::invalid("Provide exactly one of email or teamId")),
    };
    let recipient = if to_team {
        Recipient::Team(&recipient_id)
    } else {
        Recipient::User(&recipient_id)
    };

    let (share, outcome) = db::shares::upsert(
        &state.db,
        kind,
        resource_id,
        &resource.owner_id,
        recipient,
        payload.permission,
    )
    .await?;

    let notify_recipients = match outcome {
        ShareOutcome::Created => true,
        ShareOutcome::Updated { changed } => changed,
    };
    if notify_recipients {
        let user_ids = match recipient {
            Recipient::User(id) => vec![id.to_string()],
            Recipient::Team(team_id) => db::teams::member_ids(&state.db, team_id)
                .await?
                .into_iter()
                .filter(|id| id != user.id())
                .collect(),
        };
        let title = format!(
            "{} shared the {} \"{}\" with you ({})",
            user.0.name,
            kind,
            resource.name,
            payload.permission.as_str()
        );
        for user_id in &user_ids {
            notify(
                &state,
                NewNotification {
                    user_id,
                    kind: NotificationKind::ShareReceived,
                    title: &title,
                    body: None,
                    resource_type: Some(kind.as_str()),
                    resource_id: Some(resource_id),
                },
            )
            .await;
        }
    }

    let status = match outcome {
        ShareOutcome::Created => {
            tracing::info!(
                "Share {} created on {} {} ({})",
                share.id,
                kind,
                resource_id,
                share.permission.as_str()
            );
            StatusCode::CREATED
        }
        ShareOutcome::Updated { .. } => StatusCode::OK,
    };
    Ok((status, Json(share)))
}

/// Shares on one resource (admin access required)
pub async fn list_resource_shares(
    State(state): State<AppState>,
    user: AuthUser,
    Path((resource_type, resource_id)): Path<(ResourceType, String)>,
) -> Result<Json<Vec<Share>>> {
    require_access(&state.db, user.id(), resource_type, &resource_id, Permission::Admin).await?;
    let shares = db::shares::list_for_resource(&state.db, resource_type, &resource_id).await?;
    Ok(Json(shares))
}

/// Everything shared with the caller, directly or through a team
pub async fn list_received(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ReceivedShare>>> {
    Ok(Json(db::shares::received(&state.db, user.id()).await?))
}

pub async fn update_share(
    State(state): State<AppState>,
    user: AuthUser,
    Path(share_id): Path<String>,
    Json(payload): Json<UpdateShareRequest>,
) -> Result<Json<Share>> {
    let share = db::shares::find(&state.db, &share_id)
        .await?
        .ok_or(AppError::NotFound("Share"))?;
    require_access(
        &state.db,
        user.id(),
        share.resource_type,
        &share.resource_id,
        Permission::Admin,
    )
    .await?;

    let share = db::shares::update_permission(&state.db, &share_id, payload.permission).await?;
    Ok(Json(share))
}

/// Revoke a share: resource admins may revoke any share, recipients may drop their own
pub async fn revoke_share(
    State(state): State<AppState>,
    user: AuthUser,
    Path(share_id): Path<String>,
) -> Result<StatusCode> {
    let share = db::shares::find(&state.db, &share_id)
        .await?
        .ok_or(AppError::NotFound("Share"))?;

    if share.shared_with_user_id.as_deref() != Some(user.id()) {
        require_access(
            &state.db,
            user.id(),
            share.resource_type,
            &share.resource_id,
            Permission::Admin,
        )
        .await?;
    }

    db::shares::delete(&state.db, &share_id).await?;
    tracing::info!("Share {} revoked by {}", share_id, user.id());
    Ok(StatusCode::NO_CONTENT)
}
