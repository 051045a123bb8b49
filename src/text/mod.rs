mod dto;
pub mod fallback;
pub mod handlers;
pub mod pipeline;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
