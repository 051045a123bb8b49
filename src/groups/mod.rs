//! Telegram-style albums: photos sharing a media-group key are fused into one summary.

pub mod aggregator;
pub mod handlers;

use crate::state::AppState;
use axum::Router;

pub use aggregator::MediaGroupAggregator;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
