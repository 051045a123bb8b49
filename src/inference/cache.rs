use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::kv::KvStore;

/// Lowercase hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn vision_key(content_hash: &str) -> String {
    let prefix = content_hash.get(..32).unwrap_or(content_hash);
    format!("vision:img:{prefix}")
}

pub fn text_key(locale: &str, text: &str) -> String {
    let digest = sha256_hex(format!("{locale}::{text}").as_bytes());
    format!("normalize:{locale}:{}", &digest[..24])
}

/// JSON cache over the kv store.
///
/// Both directions are best-effort: a read error or an undecodable entry is a miss, and a
/// failed write is logged and dropped. Callers never see a cache failure.
#[derive(Clone)]
pub struct JsonCache {
    kv: Arc<dyn KvStore>,
}

impl JsonCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.kv.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(v) => {
                debug!(key, "cache hit");
                Some(v)
            }
            Err(e) => {
                warn!(key, error = %e, "undecodable cache entry, treating as miss");
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache value not serializable");
                return;
            }
        };
        if let Err(e) = self.kv.set_ex(key, &raw, ttl).await {
            warn!(key, error = %e, "cache write failed");
        }
    }
}
