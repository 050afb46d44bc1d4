// ============================
// crates/backend-lib/src/handlers/history.rs
// ============================
//! Meeting history endpoints.
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use meetmesh_common::MeetingLogEntry;

use super::parse_index;
use crate::error::AppError;
use crate::storage::BlobStore;
use crate::AppState;

/// `GET /meetings`
pub async fn list_meetings<S: BlobStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<MeetingLogEntry>>, AppError> {
    Ok(Json(state.history.list_meetings().await?))
}

/// `DELETE /meetings/{index}`
pub async fn delete_meeting<S: BlobStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(index): Path<String>,
) -> Result<StatusCode, AppError> {
    let index = parse_index(&index)?;
    let removed = state.history.delete_meeting(index).await?;
    tracing::info!(index, room = %removed.room_id, "meeting entry deleted");
    Ok(StatusCode::NO_CONTENT)
}
