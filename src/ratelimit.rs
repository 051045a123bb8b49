use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::kv::{KvError, KvStore};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Daily per-owner photo counter. The key carries the UTC date and expires after a day, so
/// the count resets without any cleanup job.
#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    quota: u32,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, quota: u32) -> Self {
        Self { kv, clock, quota }
    }

    fn key(&self, owner_id: Uuid) -> String {
        format!("rl:photos:{owner_id}:{}", self.clock.now().date())
    }

    pub async fn used(&self, owner_id: Uuid) -> Result<u32, KvError> {
        let raw = self.kv.get(&self.key(owner_id)).await?;
        Ok(raw.and_then(|v| v.parse::<u32>().ok()).unwrap_or(0))
    }

    pub async fn check(&self, owner_id: Uuid) -> Result<(), PipelineError> {
        if self.used(owner_id).await? >= self.quota {
            tracing::info!(%owner_id, quota = self.quota, "daily photo quota reached");
            return Err(PipelineError::QuotaExceeded { quota: self.quota });
        }
        Ok(())
    }

    pub async fn record(&self, owner_id: Uuid) -> Result<i64, KvError> {
        self.kv.incr_with_expiry(&self.key(owner_id), DAY).await
    }
}
