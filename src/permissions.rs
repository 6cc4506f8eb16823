//! Access resolution for shareable resources.
//!
//! A user's access to a file, document or folder is the strongest of:
//! - ownership of the resource,
//! - a direct share or a share to one of the user's teams on the resource,
//! - the same, inherited from any ancestor folder (owning an ancestor folder
//!   grants admin).

use crate::constants::{
    ERR_FOREIGN_FOLDER_MOVE, ERR_INSUFFICIENT_PERMISSION, ERR_OWNER_ONLY, MAX_FOLDER_DEPTH,
};
use crate::db::{self, Db};
use crate::error::{AppError, Result};
use crate::models::{Permission, ResourceType};

/// Resolved access of one user to one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Owner,
    Shared(Permission),
}

impl Access {
    /// Effective permission level (owners hold every level)
    pub fn permission(self) -> Permission {
        match self {
            Access::Owner => Permission::Admin,
            Access::Shared(level) => level,
        }
    }

    pub fn allows(self, needed: Permission) -> bool {
        self.permission() >= needed
    }

    pub fn is_owner(self) -> bool {
        matches!(self, Access::Owner)
    }
}

/// Ownership and placement of a resource, as needed for access checks
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub name: String,
    pub owner_id: String,
    pub folder_id: Option<String>,
}

/// Ownership and placement of a resource, `None` when it does not exist
pub async fn load_resource(
    db: &Db,
    kind: ResourceType,
    id: &str,
) -> Result<Option<ResourceInfo>> {
    let info = match kind {
        ResourceType::File => db::files::find(db, id).await?.map(|f| ResourceInfo {
            name: f.name,
            owner_id: f.owner_id,
            folder_id: f.folder_id,
        }),
        ResourceType::Document => db::documents::find(db, id).await?.map(|d| ResourceInfo {
            name: d.title,
            owner_id: d.owner_id,
            folder_id: d.folder_id,
        }),
        ResourceType::Folder => db::folders::find(db, id).await?.map(|f| ResourceInfo {
            name: f.name,
            owner_id: f.owner_id,
            folder_id: f.parent_id,
        }),
    };
    Ok(info)
}

/// Resolve what `user_id` may do with a resource
///
/// Returns `Err(NotFound)` when the resource does not exist and `Ok(None)`
/// when it exists but the user has no access at all.
pub async fn resolve_access(
    db: &Db,
    user_id: &str,
    kind: ResourceType,
    resource_id: &str,
) -> Result<Option<Access>> {
    let info = load_resource(db, kind, resource_id)
        .await?
        .ok_or(AppError::NotFound(kind.label()))?;

    if info.owner_id == user_id {
        return Ok(Some(Access::Owner));
    }

    let mut best = db::shares::granted_permissions(db, user_id, kind, resource_id)
        .await?
        .into_iter()
        .max();

    if let Some(parent_id) = info.folder_id.as_deref() {
        let chain = db::folders::ancestors(db, parent_id).await?;
        for folder in chain.iter().take(MAX_FOLDER_DEPTH) {
            if best == Some(Permission::Admin) {
                break;
            }
            let inherited = if folder.owner_id == user_id {
                Some(Permission::Admin)
            } else {
                db::shares::granted_permissions(db, user_id, ResourceType::Folder, &folder.id)
                    .await?
                    .into_iter()
                    .max()
            };
            best = best.max(inherited);
        }
    }

    Ok(best.map(Access::Shared))
}

/// Require at least `needed` on a resource
///
/// Users without any access get 404 so that resource existence is not leaked;
/// users with insufficient access get 403.
pub async fn require_access(
    db: &Db,
    user_id: &str,
    kind: ResourceType,
    resource_id: &str,
    needed: Permission,
) -> Result<Access> {
    match resolve_access(db, user_id, kind, resource_id).await? {
        Some(access) if access.allows(needed) => Ok(access),
        Some(_) => {
            tracing::warn!(
                "User {} lacks {} access to {} {}",
                user_id,
                needed.as_str(),
                kind,
                resource_id
            );
            Err(AppError::forbidden(ERR_INSUFFICIENT_PERMISSION))
        }
        None => Err(AppError::NotFound(kind.label())),
    }
}

/// Require ownership of a resource (deletion)
pub async fn require_owner(
    db: &Db,
    user_id: &str,
    kind: ResourceType,
    resource_id: &str,
) -> Result<()> {
    let access = require_access(db, user_id, kind, resource_id, Permission::View).await?;
    if !access.is_owner() {
        return Err(AppError::forbidden(ERR_OWNER_ONLY));
    }
    Ok(())
}

/// Check that `user_id` may place content inside `folder_id`
pub async fn require_folder_edit(db: &Db, user_id: &str, folder_id: &str) -> Result<()> {
    require_access(db, user_id, ResourceType::Folder, folder_id, Permission::Edit).await?;
    Ok(())
}

/// Check that `user_id` may move a resource owned by `owner_id` into `destination`
///
/// Owning a folder grants admin over its contents, so a non-owner may only
/// move the resource under folders its owner holds. `None` is the root.
pub async fn require_move_target(
    db: &Db,
    user_id: &str,
    owner_id: &str,
    destination: Option<&str>,
) -> Result<()> {
    let Some(folder_id) = destination else {
        return Ok(());
    };
    require_folder_edit(db, user_id, folder_id).await?;
    if user_id == owner_id {
        return Ok(());
    }

    let chain = db::folders::ancestors(db, folder_id).await?;
    if chain.iter().any(|folder| folder.owner_id != owner_id) {
        tracing::warn!(
            "User {} tried to move a resource of {} into folder {}",
            user_id,
            owner_id,
            folder_id
        );
        return Err(AppError::forbidden(ERR_FOREIGN_FOLDER_MOVE));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_has_every_level() {
        assert!(Access::Owner.allows(Permission::Admin));
        assert!(Access::Owner.is_owner());
        assert_eq!(Access::Owner.permission(), Permission::Admin);
    }

    #[test]
    fn test_shared_levels() {
        let edit = Access::Shared(Permission::Edit);
        assert!(edit.allows(Permission::View));
        assert!(edit.allows(Permission::Edit));
        assert!(!edit.allows(Permission::Admin));
        assert!(!edit.is_owner());

        let admin = Access::Shared(Permission::Admin);
        assert!(admin.allows(Permission::Admin));
        assert!(!admin.is_owner());
    }
}
