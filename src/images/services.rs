use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::processing::{preprocess, ProcessedImage};
use crate::error::PipelineError;
use crate::inference::queue::TaskQueue;
use crate::inference::repo::{InferenceRepo, TaskStatus};
use crate::photos::repo::{NewPhoto, Photo, PhotoRepo};
use crate::ratelimit::RateLimiter;
use crate::state::AppState;
use crate::storage::StorageClient;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReceipt {
    pub image_id: Uuid,
    pub storage_key: String,
    pub content_hash: String,
    pub status: TaskStatus,
    /// Bytes were already known; no new task was created.
    pub duplicate: bool,
}

pub fn storage_key(owner_id: Uuid, img: &ProcessedImage) -> String {
    let hash = &img.content_hash;
    let shard = hash.get(..2).unwrap_or("00");
    format!("users/{owner_id}/images/{shard}/{hash}.{}", img.extension())
}

/// Content-addressed photo ingestion: quota, normalization, dedup, storage and enqueue.
#[derive(Clone)]
pub struct IngestService {
    storage: Arc<dyn StorageClient>,
    photos: Arc<dyn PhotoRepo>,
    inference: Arc<dyn InferenceRepo>,
    queue: TaskQueue,
    limiter: RateLimiter,
    max_side: u32,
}

impl IngestService {
    pub fn from_state(st: &AppState) -> Self {
        Self {
            storage: st.storage.clone(),
            photos: st.photos.clone(),
            inference: st.inference.clone(),
            queue: TaskQueue::new(st.kv.clone()),
            limiter: RateLimiter::new(
                st.kv.clone(),
                st.clock.clone(),
                st.config.pipeline.daily_photo_quota,
            ),
            max_side: st.config.pipeline.max_image_side,
        }
    }

    #[instrument(skip(self, raw), fields(bytes = raw.len()))]
    pub async fn ingest(
        &self,
        owner_id: Uuid,
        raw: Bytes,
        content_type: &str,
    ) -> Result<IngestReceipt, PipelineError> {
        self.limiter.check(owner_id).await?;

        let max_side = self.max_side;
        let img = tokio::task::spawn_blocking(move || preprocess(&raw, max_side))
            .await
            .map_err(|e| PipelineError::InvalidImage(format!("image processing aborted: {e}")))??;

        if let Some(existing) = self
            .photos
            .find_by_hash(&img.content_hash)
            .await
            .map_err(PipelineError::Repository)?
        {
            return self.resolve_duplicate(existing).await;
        }

        let key = storage_key(owner_id, &img);
        self.storage
            .put_object(&key, img.bytes.clone(), img.content_type)
            .await
            .map_err(PipelineError::Storage)?;

        let (photo, inserted) = self
            .photos
            .insert_or_get(NewPhoto {
                id: Uuid::new_v4(),
                owner_id,
                content_hash: img.content_hash.clone(),
                storage_key: key,
                width: i32::try_from(img.width).unwrap_or(i32::MAX),
                height: i32::try_from(img.height).unwrap_or(i32::MAX),
                content_type: img.content_type.to_string(),
            })
            .await
            .map_err(PipelineError::Repository)?;

        if !inserted {
            return self.resolve_duplicate(photo).await;
        }

        self.limiter.record(owner_id).await?;
        let task = self
            .inference
            .create_task(photo.id, owner_id)
            .await
            .map_err(PipelineError::Repository)?;
        self.enqueue(photo.id).await?;

        info!(image_id = %photo.id, %owner_id, content_hash = %photo.content_hash, "photo ingested");
        Ok(IngestReceipt {
            image_id: photo.id,
            storage_key: photo.storage_key,
            content_hash: photo.content_hash,
            status: task.status,
            duplicate: false,
        })
    }

    /// Known bytes: hand back the existing photo. Only a `failed` task is put back in line.
    async fn resolve_duplicate(&self, photo: Photo) -> Result<IngestReceipt, PipelineError> {
        let mut task = self
            .inference
            .create_task(photo.id, photo.owner_id)
            .await
            .map_err(PipelineError::Repository)?;

        if task.status == TaskStatus::Failed
            && self
                .inference
                .requeue_failed(photo.id)
                .await
                .map_err(PipelineError::Repository)?
        {
            self.enqueue(photo.id).await?;
            task.status = TaskStatus::Queued;
            info!(image_id = %photo.id, "failed task re-queued by re-upload");
        }

        info!(image_id = %photo.id, content_hash = %photo.content_hash, "duplicate upload");
        Ok(IngestReceipt {
            image_id: photo.id,
            storage_key: photo.storage_key,
            content_hash: photo.content_hash,
            status: task.status,
            duplicate: true,
        })
    }

    async fn enqueue(&self, image_id: Uuid) -> Result<(), PipelineError> {
        if let Err(e) = self.queue.enqueue(image_id).await {
            // A queued task nobody will pop would block retries forever.
            if let Err(se) = self
                .inference
                .set_status(image_id, TaskStatus::Failed)
                .await
            {
                warn!(%image_id, error = %se, "could not mark unenqueued task as failed");
            }
            return Err(e.into());
        }
        Ok(())
    }
}
