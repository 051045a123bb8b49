use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cache::{vision_key, JsonCache};
use super::provider::{InferenceProvider, ProviderPayload};
use super::queue::TaskQueue;
use super::repo::{InferenceRepo, InferenceResult, TaskStatus};
use crate::error::PipelineError;
use crate::kv::KvError;
use crate::nutrition::{apply_heuristics, validate, HeuristicsConfig, QcConfig};
use crate::photos::repo::PhotoRepo;
use crate::state::AppState;
use crate::storage::StorageClient;

/// One inference loop. Several can run against the same queue: a popped id belongs to exactly
/// one worker and every status write is keyed by image id.
pub struct Worker {
    queue: TaskQueue,
    photos: Arc<dyn PhotoRepo>,
    inference: Arc<dyn InferenceRepo>,
    storage: Arc<dyn StorageClient>,
    provider: Arc<dyn InferenceProvider>,
    cache: JsonCache,
    cache_ttl: Duration,
    poll: Duration,
    heuristics: HeuristicsConfig,
    qc: QcConfig,
}

impl Worker {
    pub fn from_state(st: &AppState) -> Self {
        Self {
            queue: TaskQueue::new(st.kv.clone()),
            photos: st.photos.clone(),
            inference: st.inference.clone(),
            storage: st.storage.clone(),
            provider: st.provider.clone(),
            cache: JsonCache::new(st.kv.clone()),
            cache_ttl: st.config.pipeline.vision_cache_ttl(),
            poll: st.config.pipeline.worker_poll(),
            heuristics: HeuristicsConfig::default(),
            qc: QcConfig::default(),
        }
    }

    pub async fn run(self, worker_no: usize) {
        info!(worker_no, "inference worker started");
        loop {
            match self.tick().await {
                Ok(Some(_)) => {}
                Ok(None) => tokio::time::sleep(self.poll).await,
                Err(e) => {
                    warn!(worker_no, error = %e, "queue unavailable, backing off");
                    tokio::time::sleep(self.poll).await;
                }
            }
        }
    }

    /// Pops and processes at most one task. `None` when the queue was empty. A popped id whose
    /// task is already `ready` or `failed` is dropped and its stored status returned.
    pub async fn tick(&self) -> Result<Option<(Uuid, TaskStatus)>, KvError> {
        let Some(image_id) = self.queue.dequeue().await? else {
            return Ok(None);
        };
        match self.inference.get_task(image_id).await {
            Ok(Some(task)) if task.status.is_terminal() => {
                debug!(%image_id, status = %task.status, "skipping finished task");
                return Ok(Some((image_id, task.status)));
            }
            Ok(_) => {}
            Err(e) => warn!(%image_id, error = %e, "could not load task before processing"),
        }
        let status = self.process(image_id).await;
        match self.queue.len().await {
            Ok(backlog) => debug!(%image_id, backlog, "task done"),
            Err(e) => debug!(error = %e, "queue length unavailable"),
        }
        Ok(Some((image_id, status)))
    }

    /// Drives one task to a terminal state. Never returns an error: failures become `failed`.
    pub async fn process(&self, image_id: Uuid) -> TaskStatus {
        let outcome = match self.inference.set_status(image_id, TaskStatus::Processing).await {
            Ok(()) => self.infer(image_id).await,
            Err(e) => Err(PipelineError::Repository(e)),
        };

        let status = match outcome {
            Ok(result) => {
                info!(
                    %image_id,
                    items = result.items.len(),
                    needs_clarification = result.quality.needs_clarification,
                    "inference ready"
                );
                TaskStatus::Ready
            }
            Err(e) => {
                error!(%image_id, error = %e, "inference failed");
                TaskStatus::Failed
            }
        };

        if let Err(e) = self.inference.set_status(image_id, status).await {
            error!(%image_id, %status, error = %e, "could not record task status");
        }
        status
    }

    async fn infer(&self, image_id: Uuid) -> Result<InferenceResult, PipelineError> {
        let photo = self
            .photos
            .get(image_id)
            .await
            .map_err(PipelineError::Repository)?
            .ok_or_else(|| PipelineError::NotFound(format!("photo {image_id}")))?;

        let key = vision_key(&photo.content_hash);
        let payload = match self.cache.get::<ProviderPayload>(&key).await {
            Some(hit) => {
                debug!(%image_id, content_hash = %photo.content_hash, "vision cache hit");
                hit
            }
            None => {
                let bytes = self
                    .storage
                    .get_object(&photo.storage_key)
                    .await
                    .map_err(PipelineError::Storage)?;
                let fresh = self
                    .provider
                    .infer_image(&bytes, &photo.content_type)
                    .await?;
                self.cache.put(&key, &fresh, self.cache_ttl).await;
                fresh
            }
        };

        let priors = match self.inference.portion_priors(photo.owner_id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(owner_id = %photo.owner_id, error = %e, "portion priors unavailable, using built-in table");
                None
            }
        };

        let items = apply_heuristics(payload.items, priors.as_ref(), &self.heuristics);
        let quality = payload.quality.merge(validate(&items, &self.qc));

        let result = InferenceResult {
            image_id,
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            items,
            quality,
            created_at: OffsetDateTime::now_utc(),
        };
        self.inference
            .append_result(&result)
            .await
            .map_err(PipelineError::Repository)?;
        Ok(result)
    }
}
