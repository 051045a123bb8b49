use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::aggregator::{GroupStatus, GroupSummary, MediaGroupAggregator};
use crate::auth::extractors::AuthUser;
use crate::error::PipelineError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/media-groups/:key", get(get_group))
        .route("/media-groups/:key/finalize", post(finalize_group))
}

#[instrument(skip(state))]
pub async fn get_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(key): Path<String>,
) -> Result<Json<GroupStatus>, PipelineError> {
    let status = MediaGroupAggregator::from_state(&state)
        .status(user_id, &key)
        .await?;
    Ok(Json(status))
}

/// Finalizes right away, without waiting for the debounce window.
#[instrument(skip(state))]
pub async fn finalize_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(key): Path<String>,
) -> Result<Json<GroupSummary>, PipelineError> {
    let summary = MediaGroupAggregator::from_state(&state)
        .finalize(user_id, &key)
        .await?;
    Ok(Json(summary))
}
