use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::constants::MAX_DOCUMENT_CONTENT_LEN;
use crate::db;
use crate::error::{AppError, Result};
use crate::models::{
    validate_resource_name, Document, DocumentSummary, DocumentUpdate, Permission, ResourceType,
};
use crate::permissions::{require_access, require_move_target, require_owner};
use crate::routes::folders::check_destination;
use crate::routes::nullable;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub folder_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    /// `null` moves the document to the root
    #[serde(default, deserialize_with = "nullable")]
    pub folder_id: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFilter {
    pub folder_id: Option<String>,
}

/// A document with the caller's effective permission
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    #[serde(flatten)]
    pub document: Document,
    pub permission: Permission,
}

fn validate_content(content: &str) -> Result<()> {
    if content.len() > MAX_DOCUMENT_CONTENT_LEN {
        return Err(AppError::PayloadTooLarge);
    }
    Ok(())
}

pub async fn create_document(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<Document>)> {
    if !validate_resource_name(&payload.title) {
        return Err(AppError::invalid("Invalid document title"));
    }
    validate_content(&payload.content)?;
    check_destination(&state.db, user.id(), payload.folder_id.as_deref()).await?;

    let document = db::documents::create(
        &state.db,
        user.id(),
        payload.title.trim(),
        &payload.content,
        payload.folder_id.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// Root documents of the caller, or the documents of `?folderId=`
pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<DocumentFilter>,
) -> Result<Json<Vec<DocumentSummary>>> {
    let documents = match filter.folder_id.as_deref() {
        Some(folder_id) => {
            require_access(&state.db, user.id(), ResourceType::Folder, folder_id, Permission::View)
                .await?;
            db::documents::list_in_folder(&state.db, folder_id).await?
        }
        None => db::documents::list_root(&state.db, user.id()).await?,
    };
    Ok(Json(documents))
}

pub async fn get_document(
    State(state): State<AppState>,
    user: AuthUser,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentView>> {
    let access = require_access(
        &state.db,
        user.id(),
        ResourceType::Document,
        &document_id,
        Permission::View,
    )
    .await?;
    let document = db::documents::find(&state.db, &document_id)
        .await?
        .ok_or(AppError::NotFound("Document"))?;
    Ok(Json(DocumentView {
        document,
        permission: access.permission(),
    }))
}

pub async fn update_document(
    State(state): State<AppState>,
    user: AuthUser,
    Path(document_id): Path<String>,
    Json(payload): Json<UpdateDocumentRequest>,
) -> Result<Json<Document>> {
    require_access(
        &state.db,
        user.id(),
        ResourceType::Document,
        &document_id,
        Permission::Edit,
    )
    .await?;
    if let Some(title) = payload.title.as_deref() {
        if !validate_resource_name(title) {
            return Err(AppError::invalid("Invalid document title"));
        }
    }
    if let Some(content) = payload.content.as_deref() {
        validate_content(content)?;
    }
    if let Some(destination) = payload.folder_id.as_ref() {
        let document = db::documents::find(&state.db, &document_id)
            .await?
            .ok_or(AppError::NotFound("Document"))?;
        require_move_target(&state.db, user.id(), &document.owner_id, destination.as_deref())
            .await?;
    }

    let document = db::documents::update(
        &state.db,
        &document_id,
        payload.title.as_deref().map(str::trim),
        payload.content.as_deref(),
        payload.folder_id.as_ref().map(|f| f.as_deref()),
    )
    .await?;
    Ok(Json(document))
}

/// Delete a document and its edit history (owner only)
pub async fn delete_document(
    State(state): State<AppState>,
    user: AuthUser,
    Path(document_id): Path<String>,
) -> Result<StatusCode> {
    require_owner(&state.db, user.id(), ResourceType::Document, &document_id).await?;
    db::documents::delete(&state.db, &document_id).await?;
    tracing::info!("Document {} deleted by {}", document_id, user.id());
    Ok(StatusCode::NO_CONTENT)
}

/// Persisted realtime deltas in the order they were applied
pub async fn list_updates(
    State(state): State<AppState>,
    user: AuthUser,
    Path(document_id): Path<String>,
) -> Result<Json<Vec<DocumentUpdate>>> {
    require_access(
        &state.db,
        user.id(),
        ResourceType::Document,
        &document_id,
        Permission::View,
    )
    .await?;
    Ok(Json(db::documents::updates(&state.db, &document_id).await?))
}
