use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::MediaGroupConfig;
use crate::error::PipelineError;
use crate::inference::repo::{InferenceRepo, InferenceResult};
use crate::kv::KvStore;
use crate::nutrition::types::{push_unique, round1};
use crate::nutrition::{NormalizedItem, Unit};
use crate::state::AppState;

/// Fused view over every photo of one media group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_key: String,
    pub image_ids: Vec<Uuid>,
    pub items: Vec<NormalizedItem>,
    pub needs_clarification: bool,
    pub clarifications: Vec<String>,
    /// Members that had no ready result when the group was finalized.
    pub missing: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub finalized_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GroupStatus {
    Collecting { members: u64 },
    Finalized { summary: GroupSummary },
}

struct Keys {
    members: String,
    lock: String,
    meta: String,
    result: String,
}

impl Keys {
    fn new(owner_id: Uuid, group_key: &str) -> Self {
        let base = format!("mg:{owner_id}:{group_key}");
        Self {
            members: format!("{base}:members"),
            lock: format!("{base}:lock"),
            meta: format!("{base}:meta"),
            result: format!("{base}:result"),
        }
    }
}

/// Sums items that share a case-insensitive name and unit. The first occurrence seeds the
/// merged line and keeps its position.
///
/// The unit is part of the key: "juice 200 ml" and "juice 50 g" stay two lines instead of adding
/// millilitres to grams.
pub fn fuse_items(results: &[InferenceResult]) -> Vec<NormalizedItem> {
    let mut order: Vec<(String, Unit)> = Vec::new();
    let mut merged: HashMap<(String, Unit), NormalizedItem> = HashMap::new();

    for item in results.iter().flat_map(|r| r.items.iter()) {
        let key = (item.name.trim().to_lowercase(), item.unit);
        match merged.get_mut(&key) {
            Some(acc) => {
                acc.amount = round1(acc.amount + item.amount);
                acc.kcal = round1(acc.kcal + item.kcal);
                acc.protein_g = round1(acc.protein_g + item.protein_g);
                acc.fat_g = round1(acc.fat_g + item.fat_g);
                acc.carb_g = round1(acc.carb_g + item.carb_g);
                push_unique(&mut acc.sources, item.sources.iter().cloned());
                push_unique(&mut acc.assumptions, item.assumptions.iter().cloned());
            }
            None => {
                order.push(key.clone());
                merged.insert(key, item.clone());
            }
        }
    }

    order
        .into_iter()
        .filter_map(|k| merged.remove(&k))
        .collect()
}

/// Media-group accumulation with single-flight finalize.
#[derive(Clone)]
pub struct MediaGroupAggregator {
    kv: Arc<dyn KvStore>,
    inference: Arc<dyn InferenceRepo>,
    cfg: MediaGroupConfig,
}

impl MediaGroupAggregator {
    pub fn new(kv: Arc<dyn KvStore>, inference: Arc<dyn InferenceRepo>, cfg: MediaGroupConfig) -> Self {
        Self { kv, inference, cfg }
    }

    pub fn from_state(st: &AppState) -> Self {
        Self::new(
            st.kv.clone(),
            st.inference.clone(),
            st.config.media_group.clone(),
        )
    }

    /// Adds a photo to the group. The participant that wins the lock gets the handle of the
    /// delayed finalize; everyone else gets `None`.
    #[instrument(skip(self))]
    pub async fn register(
        &self,
        owner_id: Uuid,
        group_key: &str,
        image_id: Uuid,
    ) -> Result<Option<JoinHandle<Result<GroupSummary, PipelineError>>>, PipelineError> {
        let keys = Keys::new(owner_id, group_key);
        let ttl = self.cfg.ttl();

        let len = self.kv.rpush(&keys.members, &image_id.to_string()).await?;
        self.kv.expire(&keys.members, ttl).await?;
        if len > self.cfg.max_members as u64 {
            warn!(group_key, members = len, cap = self.cfg.max_members, "media group over capacity, extra photos will be dropped");
        }
        let owner = owner_id.to_string();
        self.kv
            .hset(&keys.meta, &[("owner_id", owner.as_str()), ("state", "collecting")])
            .await?;
        self.kv.expire(&keys.meta, ttl).await?;

        if !self.kv.try_lock(&keys.lock, self.cfg.lock_ttl()).await? {
            return Ok(None);
        }

        info!(group_key, %image_id, "elected media group finalizer");
        let this = self.clone();
        let group_key = group_key.to_string();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.cfg.debounce()).await;
                let res = this.finalize(owner_id, &group_key).await;
                match &res {
                    Ok(s) => info!(%group_key, items = s.items.len(), "media group finalized"),
                    Err(PipelineError::EmptyGroup(_)) => {
                        warn!(%group_key, "media group had no ready results")
                    }
                    Err(e) => error!(%group_key, error = %e, "media group finalize failed"),
                }
                // Siblings that registered while the lock was held saw no election; pick them up.
                if res.is_ok() && this.pending_after_release(owner_id, &group_key).await {
                    info!(%group_key, "late media group members, finalizing again");
                    continue;
                }
                return res;
            }
        });
        Ok(Some(handle))
    }

    /// Drains the new members and fuses them together with every member of an earlier summary,
    /// then stores the result for the group TTL. Re-running it never loses items: the summary is
    /// rebuilt from the latest result of each member.
    #[instrument(skip(self))]
    pub async fn finalize(&self, owner_id: Uuid, group_key: &str) -> Result<GroupSummary, PipelineError> {
        let keys = Keys::new(owner_id, group_key);

        let mut drained: Vec<Uuid> = Vec::new();
        for raw in self.kv.drain_list(&keys.members).await? {
            match Uuid::parse_str(&raw) {
                Ok(id) if !drained.contains(&id) => drained.push(id),
                Ok(_) => {}
                Err(e) => warn!(group_key, entry = %raw, error = %e, "skipping malformed member"),
            }
        }

        let mut ids: Vec<Uuid> = match self.stored_summary(&keys).await {
            Some(prev) => prev.image_ids,
            None => Vec::new(),
        };
        for id in &drained {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        if ids.len() > self.cfg.max_members {
            let dropped = ids.split_off(self.cfg.max_members);
            warn!(group_key, dropped = dropped.len(), "dropping media group members over capacity");
        }

        let mut results = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in &ids {
            match self
                .inference
                .latest_result(*id)
                .await
                .map_err(PipelineError::Repository)?
            {
                Some(r) => results.push(r),
                None => missing.push(*id),
            }
        }

        if results.is_empty() {
            // Keep the members so a later finalize can still pick them up.
            for id in &drained {
                self.kv.rpush(&keys.members, &id.to_string()).await?;
            }
            if !drained.is_empty() {
                self.kv.expire(&keys.members, self.cfg.ttl()).await?;
            }
            self.release(&keys, "empty").await;
            return Err(PipelineError::EmptyGroup(group_key.to_string()));
        }

        let mut clarifications = Vec::new();
        let mut needs_clarification = false;
        for r in &results {
            needs_clarification |= r.quality.needs_clarification;
            push_unique(&mut clarifications, r.quality.clarifications.iter().cloned());
        }

        let summary = GroupSummary {
            group_key: group_key.to_string(),
            image_ids: ids,
            items: fuse_items(&results),
            needs_clarification: needs_clarification || !clarifications.is_empty(),
            clarifications,
            missing,
            finalized_at: OffsetDateTime::now_utc(),
        };

        match serde_json::to_string(&summary) {
            Ok(raw) => {
                if let Err(e) = self.kv.set_ex(&keys.result, &raw, self.cfg.ttl()).await {
                    warn!(group_key, error = %e, "could not store media group summary");
                }
            }
            Err(e) => warn!(group_key, error = %e, "media group summary not serializable"),
        }
        self.release(&keys, "finalized").await;
        Ok(summary)
    }

    pub async fn status(&self, owner_id: Uuid, group_key: &str) -> Result<GroupStatus, PipelineError> {
        let keys = Keys::new(owner_id, group_key);
        if let Some(raw) = self.kv.get(&keys.result).await? {
            let summary = serde_json::from_str(&raw)
                .map_err(|e| PipelineError::Repository(anyhow::anyhow!("group summary: {e}")))?;
            return Ok(GroupStatus::Finalized { summary });
        }
        let members = self.kv.llen(&keys.members).await?;
        let meta = self.kv.hgetall(&keys.meta).await?;
        if members > 0 || !meta.is_empty() {
            return Ok(GroupStatus::Collecting { members });
        }
        Err(PipelineError::NotFound(format!("media group {group_key}")))
    }

    async fn stored_summary(&self, keys: &Keys) -> Option<GroupSummary> {
        let raw = match self.kv.get(&keys.result).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %keys.result, error = %e, "could not read media group summary");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(key = %keys.result, error = %e, "discarding undecodable media group summary");
                None
            }
        }
    }

    /// `true` when members are waiting and this caller took the lock for another round.
    async fn pending_after_release(&self, owner_id: Uuid, group_key: &str) -> bool {
        let keys = Keys::new(owner_id, group_key);
        match self.kv.llen(&keys.members).await {
            Ok(0) => false,
            Ok(_) => self
                .kv
                .try_lock(&keys.lock, self.cfg.lock_ttl())
                .await
                .unwrap_or(false),
            Err(e) => {
                warn!(group_key, error = %e, "could not check for late media group members");
                false
            }
        }
    }

    async fn release(&self, keys: &Keys, state: &str) {
        if let Err(e) = self.kv.hset(&keys.meta, &[("state", state)]).await {
            warn!(key = %keys.meta, error = %e, "could not update media group state");
        }
        if let Err(e) = self.kv.del(&keys.lock).await {
            warn!(key = %keys.lock, error = %e, "could not release media group lock");
        }
    }
}
