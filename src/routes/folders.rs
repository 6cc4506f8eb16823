use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::constants::MAX_FOLDER_DEPTH;
use crate::db::{self, Db};
use crate::error::{AppError, Result};
use crate::models::{
    validate_resource_name, DocumentSummary, FileRecord, Folder, Permission, ResourceType,
};
use crate::permissions::{
    require_access, require_folder_edit, require_move_target, require_owner,
};
use crate::routes::nullable;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    pub name: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFolderRequest {
    pub name: Option<String>,
    /// `null` moves the folder to the root
    #[serde(default, deserialize_with = "nullable")]
    pub parent_id: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFilter {
    pub parent_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderContents {
    #[serde(flatten)]
    pub folder: Folder,
    pub permission: Permission,
    pub folders: Vec<Folder>,
    pub files: Vec<FileRecord>,
    pub documents: Vec<DocumentSummary>,
}

/// A folder may take a new child only while the chain stays within the depth limit
async fn check_depth(db: &Db, parent_id: &str) -> Result<()> {
    let chain = db::folders::ancestors(db, parent_id).await?;
    if chain.len() >= MAX_FOLDER_DEPTH {
        return Err(AppError::invalid("Folders are nested too deeply"));
    }
    Ok(())
}

pub async fn create_folder(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateFolderRequest>,
) -> Result<(StatusCode, Json<Folder>)> {
    if !validate_resource_name(&payload.name) {
        return Err(AppError::invalid("Invalid folder name"));
    }
    if let Some(parent_id) = payload.parent_id.as_deref() {
        require_folder_edit(&state.db, user.id(), parent_id).await?;
        check_depth(&state.db, parent_id).await?;
    }

    let folder = db::folders::create(
        &state.db,
        user.id(),
        payload.name.trim(),
        payload.parent_id.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(folder)))
}

/// Root folders of the caller, or the children of `?parentId=`
pub async fn list_folders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<FolderFilter>,
) -> Result<Json<Vec<Folder>>> {
    let folders = match filter.parent_id.as_deref() {
        Some(parent_id) => {
            require_access(&state.db, user.id(), ResourceType::Folder, parent_id, Permission::View)
                .await?;
            db::folders::list_children(&state.db, parent_id).await?
        }
        None => db::folders::list_root(&state.db, user.id()).await?,
    };
    Ok(Json(folders))
}

pub async fn get_folder(
    State(state): State<AppState>,
    user: AuthUser,
    Path(folder_id): Path<String>,
) -> Result<Json<FolderContents>> {
    let access =
        require_access(&state.db, user.id(), ResourceType::Folder, &folder_id, Permission::View)
            .await?;
    let folder = db::folders::find(&state.db, &folder_id)
        .await?
        .ok_or(AppError::NotFound("Folder"))?;

    Ok(Json(FolderContents {
        folder,
        permission: access.permission(),
        folders: db::folders::list_children(&state.db, &folder_id).await?,
        files: db::files::list_in_folder(&state.db, &folder_id).await?,
        documents: db::documents::list_in_folder(&state.db, &folder_id).await?,
    }))
}

/// Rename and/or move a folder
///
/// Moving needs edit access on the destination and cannot place a folder
/// inside its own subtree. Non-owners can only move it under folders of its
/// owner.
pub async fn update_folder(
    State(state): State<AppState>,
    user: AuthUser,
    Path(folder_id): Path<String>,
    Json(payload): Json<UpdateFolderRequest>,
) -> Result<Json<Folder>> {
    require_access(&state.db, user.id(), ResourceType::Folder, &folder_id, Permission::Edit)
        .await?;
    if let Some(name) = payload.name.as_deref() {
        if !validate_resource_name(name) {
            return Err(AppError::invalid("Invalid folder name"));
        }
    }

    if let Some(destination) = payload.parent_id.as_ref() {
        let folder = db::folders::find(&state.db, &folder_id)
            .await?
            .ok_or(AppError::NotFound("Folder"))?;
        require_move_target(&state.db, user.id(), &folder.owner_id, destination.as_deref())
            .await?;
    }
    if let Some(Some(parent_id)) = payload.parent_id.as_ref() {
        let chain = db::folders::ancestors(&state.db, parent_id).await?;
        if chain.iter().any(|f| f.id == folder_id) {
            return Err(AppError::invalid("A folder cannot be moved into itself"));
        }
        // The moved subtree keeps its own height below the new parent
        let height = db::folders::subtree_height(&state.db, &folder_id).await?;
        if chain.len() + height >= MAX_FOLDER_DEPTH {
            return Err(AppError::invalid("Folders are nested too deeply"));
        }
    }

    let folder = db::folders::update(
        &state.db,
        &folder_id,
        payload.name.as_deref().map(str::trim),
        payload.parent_id.as_ref().map(|p| p.as_deref()),
    )
    .await?;
    Ok(Json(folder))
}

/// Delete a folder with everything inside it (owner only)
pub async fn delete_folder(
    State(state): State<AppState>,
    user: AuthUser,
    Path(folder_id): Path<String>,
) -> Result<StatusCode> {
    require_owner(&state.db, user.id(), ResourceType::Folder, &folder_id).await?;

    let keys = db::folders::subtree_storage_keys(&state.db, &folder_id).await?;
    db::folders::delete_tree(&state.db, &folder_id).await?;
    state.blobs.delete_all(&keys).await;

    tracing::info!(
        "Folder {} deleted by {} ({} files removed)",
        folder_id,
        user.id(),
        keys.len()
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Placement rules shared by files and documents: moving into a folder needs edit access there
pub async fn check_destination(
    db: &Db,
    user_id: &str,
    folder_id: Option<&str>,
) -> Result<()> {
    if let Some(folder_id) = folder_id {
        require_folder_edit(db, user_id, folder_id).await?;
    }
    Ok(())
}

