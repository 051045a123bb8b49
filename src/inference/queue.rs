use std::sync::Arc;

use uuid::Uuid;

use crate::kv::{KvError, KvStore};

pub const QUEUE_KEY: &str = "vision:queue";

/// FIFO of image ids waiting for inference. Pop order is best-effort across workers.
#[derive(Clone)]
pub struct TaskQueue {
    kv: Arc<dyn KvStore>,
}

impl TaskQueue {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn enqueue(&self, image_id: Uuid) -> Result<(), KvError> {
        self.kv.rpush(QUEUE_KEY, &image_id.to_string()).await?;
        Ok(())
    }

    /// Pops the next id. Garbage entries are logged and skipped.
    pub async fn dequeue(&self) -> Result<Option<Uuid>, KvError> {
        loop {
            let Some(raw) = self.kv.lpop(QUEUE_KEY).await? else {
                return Ok(None);
            };
            match Uuid::parse_str(&raw) {
                Ok(id) => return Ok(Some(id)),
                Err(e) => tracing::warn!(entry = %raw, error = %e, "dropping malformed queue entry"),
            }
        }
    }

    pub async fn len(&self) -> Result<u64, KvError> {
        self.kv.llen(QUEUE_KEY).await
    }
}
