use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{KvError, KvStore};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Writes between full sweeps of expired keys.
const SWEEP_EVERY: u64 = 256;

/// In-process store with the same semantics as the Redis backend. Every operation runs under
/// one mutex, which makes lock and counter operations trivially atomic.
///
/// Expired keys are dropped when read and by a sweep every [`SWEEP_EVERY`] TTL writes, so keys
/// that are written once and never read again do not pile up.
#[derive(Default)]
pub struct MemoryKv {
    slots: Mutex<HashMap<String, Slot>>,
    writes: AtomicU64,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn maybe_sweep(&self, slots: &mut HashMap<String, Slot>) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY != SWEEP_EVERY - 1 {
            return;
        }
        let before = slots.len();
        slots.retain(|_, s| !s.is_expired());
        let swept = before - slots.len();
        if swept > 0 {
            tracing::debug!(swept, remaining = slots.len(), "swept expired keys");
        }
    }

    #[cfg(test)]
    async fn key_count(&self) -> usize {
        self.slots.lock().await.len()
    }
}

fn live<'a>(slots: &'a mut HashMap<String, Slot>, key: &str) -> Option<&'a mut Slot> {
    if slots.get(key).is_some_and(Slot::is_expired) {
        slots.remove(key);
    }
    slots.get_mut(key)
}

fn wrong_type(key: &str) -> KvError {
    KvError::Operation(format!("wrong type for key {key}"))
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut slots = self.slots.lock().await;
        match live(&mut slots, key).map(|s| &s.value) {
            None => Ok(None),
            Some(Value::Str(v)) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut slots = self.slots.lock().await;
        self.maybe_sweep(&mut slots);
        slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.slots.lock().await.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = live(&mut slots, key) {
            slot.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
        let mut slots = self.slots.lock().await;
        self.maybe_sweep(&mut slots);
        let current = match live(&mut slots, key).map(|s| &s.value) {
            None => None,
            Some(Value::Str(v)) => Some(
                v.parse::<i64>()
                    .map_err(|_| KvError::Operation(format!("{key} is not an integer")))?,
            ),
            Some(_) => return Err(wrong_type(key)),
        };
        let next = current.unwrap_or(0) + 1;
        let expires_at = match current {
            None => Some(Instant::now() + ttl),
            Some(_) => slots.get(key).and_then(|s| s.expires_at),
        };
        slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut slots = self.slots.lock().await;
        self.maybe_sweep(&mut slots);
        if live(&mut slots, key).is_some() {
            return Ok(false);
        }
        slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str("1".to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut slots = self.slots.lock().await;
        if live(&mut slots, key).is_none() {
            slots.insert(
                key.to_string(),
                Slot {
                    value: Value::List(VecDeque::new()),
                    expires_at: None,
                },
            );
        }
        match slots.get_mut(key).map(|s| &mut s.value) {
            Some(Value::List(list)) => {
                list.push_back(value.to_string());
                Ok(list.len() as u64)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut slots = self.slots.lock().await;
        let popped = match live(&mut slots, key).map(|s| &mut s.value) {
            None => return Ok(None),
            Some(Value::List(list)) => (list.pop_front(), list.is_empty()),
            Some(_) => return Err(wrong_type(key)),
        };
        if popped.1 {
            slots.remove(key);
        }
        Ok(popped.0)
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        let mut slots = self.slots.lock().await;
        match live(&mut slots, key).map(|s| &s.value) {
            None => Ok(0),
            Some(Value::List(list)) => Ok(list.len() as u64),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn drain_list(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut slots = self.slots.lock().await;
        match live(&mut slots, key).map(|s| &s.value) {
            None => return Ok(Vec::new()),
            Some(Value::List(_)) => {}
            Some(_) => return Err(wrong_type(key)),
        }
        match slots.remove(key).map(|s| s.value) {
            Some(Value::List(list)) => Ok(list.into_iter().collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), KvError> {
        let mut slots = self.slots.lock().await;
        if live(&mut slots, key).is_none() {
            slots.insert(
                key.to_string(),
                Slot {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match slots.get_mut(key).map(|s| &mut s.value) {
            Some(Value::Hash(map)) => {
                for (f, v) in fields {
                    map.insert((*f).to_string(), (*v).to_string());
                }
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        let mut slots = self.slots.lock().await;
        match live(&mut slots, key).map(|s| &s.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(map)) => Ok(map.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }
}
