use axum::{extract::State, routing::post, Json, Router};
use tracing::instrument;

use super::dto::NormalizeRequest;
use super::pipeline::{NormalizeOutcome, TextNormalizer};
use crate::auth::extractors::AuthUser;
use crate::error::PipelineError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/normalize", post(normalize))
}

#[instrument(skip(state, body), fields(locale = %body.locale))]
pub async fn normalize(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Json(body): Json<NormalizeRequest>,
) -> Result<Json<NormalizeOutcome>, PipelineError> {
    let outcome = TextNormalizer::from_state(&state)
        .normalize(&body.text, &body.locale)
        .await?;
    Ok(Json(outcome))
}
