use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::inference::provider::ProviderError;
use crate::kv::KvError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("daily photo quota of {quota} reached, try again tomorrow")]
    QuotaExceeded { quota: u32 },

    #[error("media group {0} has no recognized photos yet, please resubmit")]
    EmptyGroup(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("content store error: {0:#}")]
    Storage(anyhow::Error),

    #[error("repository error: {0:#}")]
    Repository(anyhow::Error),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::EmptyGroup(_) => "empty_group",
            Self::NotFound(_) => "not_found",
            Self::InvalidImage(_) => "invalid_image",
            Self::InvalidInput(_) => "invalid_input",
            Self::Provider(ProviderError::Unavailable(_)) => "provider_unavailable",
            Self::Provider(ProviderError::ParseFailure(_)) => "parse_failure",
            Self::Kv(_) => "kv_error",
            Self::Storage(_) => "storage_error",
            Self::Repository(_) => "repository_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::EmptyGroup(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidImage(_) | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::Kv(_) | Self::Storage(_) | Self::Repository(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
