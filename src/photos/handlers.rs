use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64ct::{Base64, Encoding};
use bytes::Bytes;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::dto::{PhotoStatus, UploadBase64, UploadResponse};
use crate::auth::extractors::AuthUser;
use crate::error::PipelineError;
use crate::groups::MediaGroupAggregator;
use crate::images::IngestService;
use crate::inference::task_status;
use crate::state::AppState;

const PRESIGN_SECS: u64 = 600;

pub fn read_routes() -> Router<AppState> {
    Router::new().route("/photos/:id", get(get_photo))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/photos", post(upload_multipart))
        .route("/photos/base64", post(upload_base64))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

async fn accept(
    state: &AppState,
    user_id: Uuid,
    body: Bytes,
    content_type: &str,
    media_group: Option<String>,
) -> Result<(StatusCode, Json<UploadResponse>), PipelineError> {
    let receipt = IngestService::from_state(state)
        .ingest(user_id, body, content_type)
        .await?;

    let media_group = media_group.filter(|g| !g.trim().is_empty());
    if let Some(group) = media_group.as_deref() {
        // The elected finalizer runs detached; its outcome is read back via GET /media-groups/:key.
        MediaGroupAggregator::from_state(state)
            .register(user_id, group, receipt.image_id)
            .await?;
    }

    let status = if receipt.duplicate {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(UploadResponse { receipt, media_group })))
}

/// POST /photos (multipart)
/// Fields: `file` (required), `media_group` (optional).
#[instrument(skip(state, mp))]
pub async fn upload_multipart(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), PipelineError> {
    let mut file: Option<(Bytes, String)> = None;
    let mut media_group = None;

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| PipelineError::InvalidInput(format!("malformed multipart: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let ct = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "application/octet-stream".into());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| PipelineError::InvalidInput(format!("reading file: {e}")))?;
                file = Some((data, ct));
            }
            Some("media_group") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| PipelineError::InvalidInput(format!("reading media_group: {e}")))?;
                media_group = Some(text);
            }
            _ => {}
        }
    }

    let (body, ct) = file.ok_or_else(|| PipelineError::InvalidInput("file is required".into()))?;
    accept(&state, user_id, body, &ct, media_group).await
}

/// POST /photos/base64 { image_b64, content_type?, media_group? }
#[instrument(skip(state, body))]
pub async fn upload_base64(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<UploadBase64>,
) -> Result<(StatusCode, Json<UploadResponse>), PipelineError> {
    if body.image_b64.trim().is_empty() {
        return Err(PipelineError::InvalidInput("image_b64 is required".into()));
    }
    let bytes = Base64::decode_vec(body.image_b64.trim())
        .map_err(|_| PipelineError::InvalidInput("invalid base64".into()))?;
    let ct = body
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    accept(&state, user_id, Bytes::from(bytes), ct, body.media_group).await
}

#[instrument(skip(state))]
pub async fn get_photo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PhotoStatus>, PipelineError> {
    let view = task_status(state.inference.as_ref(), id).await?;
    // Other owners get the same answer as for an unknown id.
    if view.task.owner_id != user_id {
        return Err(PipelineError::NotFound(format!("task {id}")));
    }

    let url = match state.photos.get(id).await.map_err(PipelineError::Repository)? {
        Some(photo) => match state.storage.presign_get(&photo.storage_key, PRESIGN_SECS).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(%id, error = %e, "presign failed");
                None
            }
        },
        None => None,
    };

    Ok(Json(PhotoStatus { view, url }))
}
