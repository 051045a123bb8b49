use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Photo {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub content_hash: String,
    pub storage_key: String,
    pub width: i32,
    pub height: i32,
    pub content_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub content_hash: String,
    pub storage_key: String,
    pub width: i32,
    pub height: i32,
    pub content_type: String,
}

#[async_trait]
pub trait PhotoRepo: Send + Sync {
    /// Inserts the photo unless one with the same content hash exists. The bool is `true` when
    /// this call created the row.
    async fn insert_or_get(&self, photo: NewPhoto) -> anyhow::Result<(Photo, bool)>;

    async fn find_by_hash(&self, content_hash: &str) -> anyhow::Result<Option<Photo>>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Photo>>;
}

#[derive(Clone)]
pub struct PgPhotoRepo {
    db: PgPool,
}

impl PgPhotoRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PhotoRepo for PgPhotoRepo {
    async fn insert_or_get(&self, photo: NewPhoto) -> anyhow::Result<(Photo, bool)> {
        let inserted = sqlx::query_as::<_, Photo>(
            r#"
            INSERT INTO photos (id, owner_id, content_hash, storage_key, width, height, content_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (content_hash) DO NOTHING
            RETURNING id, owner_id, content_hash, storage_key, width, height, content_type, created_at
            "#,
        )
        .bind(photo.id)
        .bind(photo.owner_id)
        .bind(&photo.content_hash)
        .bind(&photo.storage_key)
        .bind(photo.width)
        .bind(photo.height)
        .bind(&photo.content_type)
        .fetch_optional(&self.db)
        .await
        .context("insert photo")?;

        if let Some(p) = inserted {
            return Ok((p, true));
        }

        // Lost the race to a concurrent upload of the same bytes.
        let existing = self
            .find_by_hash(&photo.content_hash)
            .await?
            .with_context(|| format!("photo {} conflicted but is missing", photo.content_hash))?;
        Ok((existing, false))
    }

    async fn find_by_hash(&self, content_hash: &str) -> anyhow::Result<Option<Photo>> {
        let row = sqlx::query_as::<_, Photo>(
            r#"
            SELECT id, owner_id, content_hash, storage_key, width, height, content_type, created_at
              FROM photos
             WHERE content_hash = $1
            "#,
        )
        .bind(content_hash)
        .fetch_optional(&self.db)
        .await
        .context("find photo by hash")?;
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Photo>> {
        let row = sqlx::query_as::<_, Photo>(
            r#"
            SELECT id, owner_id, content_hash, storage_key, width, height, content_type, created_at
              FROM photos
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get photo")?;
        Ok(row)
    }
}
