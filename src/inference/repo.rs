use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::nutrition::{NormalizedItem, PortionPriors, QualityBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Ready,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Ready => "ready",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Ready | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "ready" => Ok(TaskStatus::Ready),
            "failed" => Ok(TaskStatus::Failed),
            other => anyhow::bail!("unknown task status '{other}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceTask {
    pub image_id: Uuid,
    pub owner_id: Uuid,
    pub status: TaskStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub image_id: Uuid,
    pub provider: String,
    pub model: String,
    pub items: Vec<NormalizedItem>,
    pub quality: QualityBlock,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Durable task status, the append-only result log and per-user portion priors.
#[async_trait]
pub trait InferenceRepo: Send + Sync {
    /// Creates a `queued` task; returns the existing row untouched if one is already there.
    async fn create_task(&self, image_id: Uuid, owner_id: Uuid) -> anyhow::Result<InferenceTask>;

    /// Moves a `failed` task back to `queued`. `false` if the task was in any other state.
    ///
    /// The task row is reused rather than replaced, so `failed` is not final for a photo: a
    /// re-upload of the same bytes keeps its image id and gets another attempt. Results already
    /// appended stay in the log.
    async fn requeue_failed(&self, image_id: Uuid) -> anyhow::Result<bool>;

    async fn set_status(&self, image_id: Uuid, status: TaskStatus) -> anyhow::Result<()>;

    async fn get_task(&self, image_id: Uuid) -> anyhow::Result<Option<InferenceTask>>;

    async fn append_result(&self, result: &InferenceResult) -> anyhow::Result<()>;

    async fn latest_result(&self, image_id: Uuid) -> anyhow::Result<Option<InferenceResult>>;

    async fn portion_priors(&self, owner_id: Uuid) -> anyhow::Result<Option<PortionPriors>>;
}

#[derive(Debug, FromRow)]
struct TaskRow {
    image_id: Uuid,
    owner_id: Uuid,
    status: String,
    updated_at: OffsetDateTime,
}

impl TryFrom<TaskRow> for InferenceTask {
    type Error = anyhow::Error;

    fn try_from(r: TaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            image_id: r.image_id,
            owner_id: r.owner_id,
            status: r.status.parse()?,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ResultRow {
    image_id: Uuid,
    provider: String,
    model: String,
    items: Json<Vec<NormalizedItem>>,
    quality: Json<QualityBlock>,
    created_at: OffsetDateTime,
}

impl From<ResultRow> for InferenceResult {
    fn from(r: ResultRow) -> Self {
        Self {
            image_id: r.image_id,
            provider: r.provider,
            model: r.model,
            items: r.items.0,
            quality: r.quality.0,
            created_at: r.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgInferenceRepo {
    db: PgPool,
}

impl PgInferenceRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl InferenceRepo for PgInferenceRepo {
    async fn create_task(&self, image_id: Uuid, owner_id: Uuid) -> anyhow::Result<InferenceTask> {
        sqlx::query(
            r#"
            INSERT INTO inference_tasks (image_id, owner_id, status)
            VALUES ($1, $2, 'queued')
            ON CONFLICT (image_id) DO NOTHING
            "#,
        )
        .bind(image_id)
        .bind(owner_id)
        .execute(&self.db)
        .await
        .context("insert inference task")?;

        self.get_task(image_id)
            .await?
            .with_context(|| format!("inference task {image_id} vanished after insert"))
    }

    async fn requeue_failed(&self, image_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE inference_tasks
               SET status = 'queued', updated_at = now()
             WHERE image_id = $1 AND status = 'failed'
            "#,
        )
        .bind(image_id)
        .execute(&self.db)
        .await
        .context("requeue failed task")?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_status(&self, image_id: Uuid, status: TaskStatus) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE inference_tasks
               SET status = $2, updated_at = now()
             WHERE image_id = $1
            "#,
        )
        .bind(image_id)
        .bind(status.as_str())
        .execute(&self.db)
        .await
        .with_context(|| format!("set task {image_id} to {status}"))?;
        Ok(())
    }

    async fn get_task(&self, image_id: Uuid) -> anyhow::Result<Option<InferenceTask>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT image_id, owner_id, status, updated_at
              FROM inference_tasks
             WHERE image_id = $1
            "#,
        )
        .bind(image_id)
        .fetch_optional(&self.db)
        .await
        .context("get inference task")?;

        row.map(InferenceTask::try_from).transpose()
    }

    async fn append_result(&self, result: &InferenceResult) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inference_results (image_id, provider, model, items, quality, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(result.image_id)
        .bind(&result.provider)
        .bind(&result.model)
        .bind(Json(&result.items))
        .bind(Json(&result.quality))
        .bind(result.created_at)
        .execute(&self.db)
        .await
        .context("append inference result")?;
        Ok(())
    }

    async fn latest_result(&self, image_id: Uuid) -> anyhow::Result<Option<InferenceResult>> {
        let row = sqlx::query_as::<_, ResultRow>(
            r#"
            SELECT image_id, provider, model, items, quality, created_at
              FROM inference_results
             WHERE image_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT 1
            "#,
        )
        .bind(image_id)
        .fetch_optional(&self.db)
        .await
        .context("latest inference result")?;

        Ok(row.map(InferenceResult::from))
    }

    async fn portion_priors(&self, owner_id: Uuid) -> anyhow::Result<Option<PortionPriors>> {
        let row: Option<(Option<Json<PortionPriors>>,)> = sqlx::query_as(
            r#"
            SELECT data -> 'portion_priors'
              FROM user_settings
             WHERE user_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.db)
        .await
        .context("load portion priors")?;

        Ok(row.and_then(|(priors,)| priors).map(|p| p.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_round_trip() {
        for s in [
            TaskStatus::Queued,
            TaskStatus::Processing,
            TaskStatus::Ready,
            TaskStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<TaskStatus>().unwrap(), s);
        }
        assert!("done".parse::<TaskStatus>().is_err());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }

    #[test]
    fn task_serializes_with_lowercase_status() {
        let t = InferenceTask {
            image_id: Uuid::nil(),
            owner_id: Uuid::nil(),
            status: TaskStatus::Ready,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["status"], "ready");
        assert_eq!(v["updated_at"], "1970-01-01T00:00:00Z");
    }
}
