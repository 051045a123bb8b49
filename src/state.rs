use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::inference::openai::OpenAiProvider;
use crate::inference::provider::{DisabledProvider, InferenceProvider};
use crate::inference::repo::{InferenceRepo, PgInferenceRepo};
use crate::kv::{KvStore, MemoryKv, RedisKv};
use crate::photos::repo::{PgPhotoRepo, PhotoRepo};
use crate::ratelimit::{Clock, SystemClock};
use crate::storage::{Storage, StorageClient};

/// Everything a handler or worker needs, behind trait objects so tests can swap any of it.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
    pub kv: Arc<dyn KvStore>,
    pub photos: Arc<dyn PhotoRepo>,
    pub inference: Arc<dyn InferenceRepo>,
    pub provider: Arc<dyn InferenceProvider>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            warn!(error = %e, "migration failed; continuing");
        }

        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;

        let kv: Arc<dyn KvStore> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(RedisKv::connect(url).await?),
            None => {
                warn!("REDIS_URL not set; queue, caches and quotas are process-local");
                Arc::new(MemoryKv::new())
            }
        };

        let provider: Arc<dyn InferenceProvider> = match config.provider.api_key.as_deref() {
            Some(key) => Arc::new(OpenAiProvider::new(&config.provider, key)?),
            None => {
                warn!("PROVIDER_API_KEY not set; photos will fail and text uses the local parser");
                Arc::new(DisabledProvider)
            }
        };
        info!(provider = provider.name(), model = provider.model(), role = ?config.role, "state ready");

        Ok(Self::from_parts(
            config,
            storage,
            kv,
            Arc::new(PgPhotoRepo::new(db.clone())),
            Arc::new(PgInferenceRepo::new(db)),
            provider,
            Arc::new(SystemClock),
        ))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
        kv: Arc<dyn KvStore>,
        photos: Arc<dyn PhotoRepo>,
        inference: Arc<dyn InferenceRepo>,
        provider: Arc<dyn InferenceProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            storage,
            kv,
            photos,
            inference,
            provider,
            clock,
        }
    }
}
