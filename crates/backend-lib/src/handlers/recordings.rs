// ============================
// crates/backend-lib/src/handlers/recordings.rs
// ============================
//! Recording upload, listing, retrieval and deletion.
use std::sync::Arc;

use axum::{
    extract::{multipart::Field, Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use meetmesh_common::RecordingMetadata;

use super::parse_index;
use crate::error::AppError;
use crate::storage::BlobStore;
use crate::validation;
use crate::AppState;

/// Fields collected from an upload form
#[derive(Debug, Default)]
struct UploadForm {
    room_id: Option<String>,
    uploader_name: Option<String>,
    file: Option<(String, Vec<u8>)>,
}

async fn text_field(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::InvalidInput(e.body_text()))
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "roomId" | "room_id" => form.room_id = Some(text_field(field).await?),
            "uploaderName" | "uploader_name" => {
                form.uploader_name = Some(text_field(field).await?);
            },
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidInput(e.body_text()))?;
                form.file = Some((file_name, bytes.to_vec()));
            },
            other => tracing::debug!(field = other, "ignoring upload field"),
        }
    }
    Ok(form)
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::InvalidInput(format!("missing form field `{name}`")))
}

/// `POST /recordings` and `POST /upload-recording`
pub async fn upload_recording<S: BlobStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<RecordingMetadata>), AppError> {
    let form = read_form(multipart).await?;
    let room_id = required(form.room_id, "roomId")?;
    let uploader_name = required(form.uploader_name, "uploaderName")?;
    let (file_name, bytes) = required(form.file, "file")?;

    let room_id = validation::validate_room_key(room_id.trim())?;
    let uploader_name = validation::validate_display_name(&uploader_name)?;
    if bytes.is_empty() {
        return Err(AppError::InvalidInput("uploaded file is empty".to_string()));
    }

    let metadata = state
        .recordings
        .ingest(room_id, uploader_name, &file_name, &bytes)
        .await?;
    Ok((StatusCode::CREATED, Json(metadata)))
}

/// `GET /recordings`
pub async fn list_recordings<S: BlobStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<RecordingMetadata>>, AppError> {
    Ok(Json(state.history.list_recordings().await?))
}

/// `GET /recordings/{fileIdentifier}`
pub async fn fetch_recording<S: BlobStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (bytes, content_type) = state.recordings.fetch(&file_id).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// `DELETE /recordings/{index}`
pub async fn delete_recording<S: BlobStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(index): Path<String>,
) -> Result<StatusCode, AppError> {
    let index = parse_index(&index)?;
    let removed = state.recordings.delete_recording(index).await?;
    tracing::info!(index, file = %removed.file_identifier, "recording deleted");
    Ok(StatusCode::NO_CONTENT)
}
