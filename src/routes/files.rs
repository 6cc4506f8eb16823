use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::constants::{MAX_DOCUMENT_CONTENT_LEN, WARN_UPLOAD_SIZE_BYTES};
use crate::db::{self, files::NewFile};
use crate::error::{AppError, Result};
use crate::models::{validate_resource_name, Document, FileRecord, Permission, ResourceType};
use crate::permissions::{require_access, require_move_target, require_owner};
use crate::routes::folders::check_destination;
use crate::routes::nullable;
use crate::AppState;

const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFilter {
    pub folder_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFileRequest {
    pub name: Option<String>,
    /// `null` moves the file to the root
    #[serde(default, deserialize_with = "nullable")]
    pub folder_id: Option<Option<String>>,
}

/// Strip any client-side directory from an uploaded filename
fn base_name(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim()
}

/// Quote a filename for `Content-Disposition`
fn content_disposition(name: &str) -> String {
    let escaped: String = name
        .chars()
        .map(|c| if c == '"' || !c.is_ascii() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{escaped}\"")
}

/// Upload a file (multipart form: `file` part and optional `folderId`)
///
/// Returns 413 when the file exceeds the configured upload limit.
pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileRecord>)> {
    let mut upload: Option<(String, String, Vec<u8>)> = None;
    let mut folder_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                let name = base_name(field.file_name().unwrap_or_default()).to_string();
                let mime = field.content_type().unwrap_or(DEFAULT_MIME).to_string();
                let bytes = field.bytes().await?;
                upload = Some((name, mime, bytes.to_vec()));
            }
            Some("folderId") | Some("folder_id") => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    folder_id = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let (name, mime, bytes) =
        upload.ok_or_else(|| AppError::invalid("Multipart form must contain a file part"))?;
    if !validate_resource_name(&name) {
        return Err(AppError::invalid("Invalid file name"));
    }
    if bytes.len() > state.config.max_upload_bytes {
        return Err(AppError::PayloadTooLarge);
    }
    if bytes.len() > WARN_UPLOAD_SIZE_BYTES {
        tracing::warn!("Large upload from {}: {} bytes", user.id(), bytes.len());
    }
    check_destination(&state.db, user.id(), folder_id.as_deref()).await?;

    let storage_key = state.blobs.put(&bytes).await?;
    let inserted = db::files::insert(
        &state.db,
        NewFile {
            name: &name,
            mime_type: &mime,
            size_bytes: bytes.len() as i64,
            storage_key: &storage_key,
            owner_id: user.id(),
            folder_id: folder_id.as_deref(),
        },
    )
    .await;

    let file = match inserted {
        Ok(file) => file,
        Err(e) => {
            // Metadata failed; the blob would be unreachable
            state.blobs.delete_all(&[storage_key]).await;
            return Err(e);
        }
    };

    tracing::info!(
        "File {} uploaded by {} ({} bytes, {})",
        file.id,
        user.id(),
        file.size_bytes,
        file.mime_type
    );
    Ok((StatusCode::CREATED, Json(file)))
}

/// Root files of the caller, or the files of `?folderId=`
pub async fn list_files(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<FileFilter>,
) -> Result<Json<Vec<FileRecord>>> {
    let files = match filter.folder_id.as_deref() {
        Some(folder_id) => {
            require_access(&state.db, user.id(), ResourceType::Folder, folder_id, Permission::View)
                .await?;
            db::files::list_in_folder(&state.db, folder_id).await?
        }
        None => db::files::list_root(&state.db, user.id()).await?,
    };
    Ok(Json(files))
}

pub async fn get_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(file_id): Path<String>,
) -> Result<Json<FileRecord>> {
    require_access(&state.db, user.id(), ResourceType::File, &file_id, Permission::View).await?;
    let file = db::files::find(&state.db, &file_id)
        .await?
        .ok_or(AppError::NotFound("File"))?;
    Ok(Json(file))
}

pub async fn download_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse> {
    require_access(&state.db, user.id(), ResourceType::File, &file_id, Permission::View).await?;
    let file = db::files::find(&state.db, &file_id)
        .await?
        .ok_or(AppError::NotFound("File"))?;
    let bytes = state.blobs.get(&file.storage_key).await?;

    Ok((
        [
            (header::CONTENT_TYPE, file.mime_type.clone()),
            (header::CONTENT_DISPOSITION, content_disposition(&file.name)),
        ],
        bytes,
    ))
}

pub async fn update_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(file_id): Path<String>,
    Json(payload): Json<UpdateFileRequest>,
) -> Result<Json<FileRecord>> {
    require_access(&state.db, user.id(), ResourceType::File, &file_id, Permission::Edit).await?;
    if let Some(name) = payload.name.as_deref() {
        if !validate_resource_name(name) {
            return Err(AppError::invalid("Invalid file name"));
        }
    }
    if let Some(destination) = payload.folder_id.as_ref() {
        let file = db::files::find(&state.db, &file_id)
            .await?
            .ok_or(AppError::NotFound("File"))?;
        require_move_target(&state.db, user.id(), &file.owner_id, destination.as_deref())
            .await?;
    }

    let file = db::files::update(
        &state.db,
        &file_id,
        payload.name.as_deref().map(str::trim),
        payload.folder_id.as_ref().map(|f| f.as_deref()),
    )
    .await?;
    Ok(Json(file))
}

/// Delete a file and its blob (owner only)
pub async fn delete_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(file_id): Path<String>,
) -> Result<StatusCode> {
    require_owner(&state.db, user.id(), ResourceType::File, &file_id).await?;
    let file = db::files::find(&state.db, &file_id)
        .await?
        .ok_or(AppError::NotFound("File"))?;

    db::files::delete(&state.db, &file_id).await?;
    state.blobs.delete_all(&[file.storage_key]).await;

    tracing::info!("File {} deleted by {}", file_id, user.id());
    Ok(StatusCode::NO_CONTENT)
}

/// Turn a text file into a new document owned by the caller
pub async fn extract_document(
    State(state): State<AppState>,
    user: AuthUser,
    Path(file_id): Path<String>,
) -> Result<(StatusCode, Json<Document>)> {
    require_access(&state.db, user.id(), ResourceType::File, &file_id, Permission::View).await?;
    let file = db::files::find(&state.db, &file_id)
        .await?
        .ok_or(AppError::NotFound("File"))?;
    if !file.is_text() {
        return Err(AppError::invalid(format!(
            "Cannot extract text from {}",
            file.mime_type
        )));
    }

    let bytes = state.blobs.get(&file.storage_key).await?;
    if bytes.len() > MAX_DOCUMENT_CONTENT_LEN {
        return Err(AppError::PayloadTooLarge);
    }
    let content = String::from_utf8(bytes)
        .map_err(|_| AppError::invalid("File content is not valid UTF-8"))?;

    let document = db::documents::create(&state.db, user.id(), &file.name, &content, None).await?;
    tracing::info!("Document {} extracted from file {}", document.id, file.id);
    Ok((StatusCode::CREATED, Json(document)))
}
