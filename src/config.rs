use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// `None` disables the provider.
    pub api_key: Option<String>,
    pub vision_model: String,
    pub text_model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub daily_photo_quota: u32,
    pub max_image_side: u32,
    pub vision_cache_ttl_secs: u64,
    pub text_cache_ttl_secs: u64,
    pub worker_concurrency: usize,
    pub worker_poll_ms: u64,
    pub not_food_accept_bar: f64,
}

impl PipelineConfig {
    pub fn vision_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.vision_cache_ttl_secs)
    }

    pub fn text_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.text_cache_ttl_secs)
    }

    pub fn worker_poll(&self) -> Duration {
        Duration::from_millis(self.worker_poll_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            daily_photo_quota: 50,
            max_image_side: 1600,
            vision_cache_ttl_secs: 6 * 60 * 60,
            text_cache_ttl_secs: 12 * 60 * 60,
            worker_concurrency: 1,
            worker_poll_ms: 1000,
            not_food_accept_bar: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaGroupConfig {
    pub lock_ttl_secs: u64,
    pub debounce_ms: u64,
    pub ttl_secs: u64,
    pub max_members: usize,
}

impl MediaGroupConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for MediaGroupConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 5,
            debounce_ms: 2500,
            ttl_secs: 300,
            max_members: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppRole {
    Api,
    Worker,
    All,
}

impl AppRole {
    pub fn serves_http(self) -> bool {
        matches!(self, AppRole::Api | AppRole::All)
    }

    pub fn runs_workers(self) -> bool {
        matches!(self, AppRole::Worker | AppRole::All)
    }
}

impl FromStr for AppRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "api" => Ok(AppRole::Api),
            "worker" => Ok(AppRole::Worker),
            "all" | "" => Ok(AppRole::All),
            other => anyhow::bail!("unknown APP_ROLE '{other}' (expected api, worker or all)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub role: AppRole,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub provider: ProviderConfig,
    pub pipeline: PipelineConfig,
    pub media_group: MediaGroupConfig,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parses a numeric variable, falling back to `default` when unset or malformed.
fn num_var<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let role = match std::env::var("APP_ROLE") {
            Ok(v) => v.parse()?,
            Err(_) => AppRole::All,
        };

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: var_or("JWT_ISSUER", "mealscan"),
            audience: var_or("JWT_AUDIENCE", "mealscan-users"),
        };

        let storage = StorageConfig {
            endpoint: var_or("MINIO_ENDPOINT", "http://localhost:9000"),
            bucket: var_or("MINIO_BUCKET", "mealscan"),
            access_key: var_or("MINIO_ACCESS_KEY", "minioadmin"),
            secret_key: var_or("MINIO_SECRET_KEY", "minioadmin"),
            region: var_or("MINIO_REGION", "us-east-1"),
        };

        let provider = ProviderConfig {
            base_url: var_or("PROVIDER_BASE_URL", "https://api.openai.com/v1"),
            api_key: non_empty_var("PROVIDER_API_KEY"),
            vision_model: var_or("PROVIDER_VISION_MODEL", "gpt-4o-mini"),
            text_model: var_or("PROVIDER_TEXT_MODEL", "gpt-4o-mini"),
            timeout_secs: num_var("PROVIDER_TIMEOUT_SECS", 30),
        };

        let d = PipelineConfig::default();
        let pipeline = PipelineConfig {
            daily_photo_quota: num_var("DAILY_PHOTO_QUOTA", d.daily_photo_quota),
            max_image_side: num_var("MAX_IMAGE_SIDE", d.max_image_side),
            vision_cache_ttl_secs: num_var("VISION_CACHE_TTL_SECS", d.vision_cache_ttl_secs),
            text_cache_ttl_secs: num_var("TEXT_CACHE_TTL_SECS", d.text_cache_ttl_secs),
            worker_concurrency: num_var("WORKER_CONCURRENCY", d.worker_concurrency).max(1),
            worker_poll_ms: num_var("WORKER_POLL_MS", d.worker_poll_ms),
            not_food_accept_bar: num_var("NOT_FOOD_ACCEPT_BAR", d.not_food_accept_bar),
        };

        let g = MediaGroupConfig::default();
        let media_group = MediaGroupConfig {
            lock_ttl_secs: num_var("MEDIA_GROUP_LOCK_TTL_SECS", g.lock_ttl_secs),
            debounce_ms: num_var("MEDIA_GROUP_DEBOUNCE_MS", g.debounce_ms),
            ttl_secs: num_var("MEDIA_GROUP_TTL_SECS", g.ttl_secs),
            max_members: num_var("MEDIA_GROUP_MAX_MEMBERS", g.max_members),
        };

        Ok(Self {
            role,
            database_url,
            redis_url: non_empty_var("REDIS_URL"),
            jwt,
            storage,
            provider,
            pipeline,
            media_group,
        })
    }
}
