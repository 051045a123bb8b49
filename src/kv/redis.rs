use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{error, info};

use super::{KvError, KvStore};

const INCR_WITH_EXPIRY: &str = r#"
local v = redis.call('INCR', KEYS[1])
if v == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return v
"#;

/// Redis-backed store. `ConnectionManager` reconnects on its own, so clones are cheap handles
/// to the same multiplexed connection.
#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> Result<Self, KvError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| KvError::Unavailable(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        info!("connected to redis");
        Ok(Self { manager })
    }
}

fn op_err(op: &'static str) -> impl Fn(redis::RedisError) -> KvError {
    move |e| {
        error!(error = %e, op, "redis command failed");
        if e.is_connection_dropped() || e.is_io_error() || e.is_timeout() {
            KvError::Unavailable(e.to_string())
        } else {
            KvError::Operation(format!("{op}: {e}"))
        }
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(op_err("GET"))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.pset_ex::<_, _, ()>(key, value, millis(ttl))
            .await
            .map_err(op_err("PSETEX"))
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await.map_err(op_err("DEL"))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        let ms = i64::try_from(millis(ttl)).unwrap_or(i64::MAX);
        conn.pexpire::<_, ()>(key, ms).await.map_err(op_err("PEXPIRE"))
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
        let mut conn = self.manager.clone();
        redis::Script::new(INCR_WITH_EXPIRY)
            .key(key)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(op_err("INCR"))
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(op_err("SET NX"))?;
        Ok(reply.is_some())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut conn = self.manager.clone();
        conn.rpush(key, value).await.map_err(op_err("RPUSH"))
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        conn.lpop(key, None::<NonZeroUsize>)
            .await
            .map_err(op_err("LPOP"))
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        let mut conn = self.manager.clone();
        conn.llen(key).await.map_err(op_err("LLEN"))
    }

    async fn drain_list(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        let (items,): (Vec<String>,) = redis::pipe()
            .atomic()
            .lrange(key, 0, -1)
            .del(key)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(op_err("LRANGE+DEL"))?;
        Ok(items)
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(op_err("HSET"))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        let mut conn = self.manager.clone();
        conn.hgetall(key).await.map_err(op_err("HGETALL"))
    }
}
