//! ContentStore: read-side access to posts, engagement counters, seen markers
//! and the interaction graph.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use buildfeed_common::ContentRecord;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Top-level, non-deleted content created at or after `since`, newest first.
    async fn recent_candidates(
        &self,
        since: DateTime<Utc>,
        exclude_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ContentRecord>>;

    /// Non-deleted records for `ids`, in no particular order.
    async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ContentRecord>>;

    async fn like_counts(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, u64>>;

    /// Non-deleted direct replies per item.
    async fn reply_counts(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, u64>>;

    /// Top-level, non-deleted content newest first, skipping `exclude`.
    async fn chronological(&self, exclude: &[Uuid], offset: u64, limit: usize) -> Result<Vec<ContentRecord>>;

    /// The subset of `ids` the user has already seen.
    async fn seen_ids(&self, user_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>>;

    /// Accumulated interaction weight from the user to each author.
    async fn author_affinity(&self, user_id: Uuid, authors: &[Uuid]) -> Result<HashMap<Uuid, f64>>;
}

// ---------------------------------------------------------------------------
// PgContentStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ContentRow {
    id: Uuid,
    author_id: Uuid,
    body: String,
    media_urls: Vec<String>,
    parent_id: Option<Uuid>,
    is_deleted: bool,
    created_at: DateTime<Utc>,
}

impl From<ContentRow> for ContentRecord {
    fn from(row: ContentRow) -> Self {
        ContentRecord {
            id: row.id,
            author_id: row.author_id,
            body: row.body,
            media_urls: row.media_urls,
            parent_id: row.parent_id,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
        }
    }
}

fn counts(rows: Vec<(Uuid, i64)>) -> HashMap<Uuid, u64> {
    rows.into_iter().map(|(id, n)| (id, n.max(0) as u64)).collect()
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn recent_candidates(
        &self,
        since: DateTime<Utc>,
        exclude_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ContentRecord>> {
        let rows = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT id, author_id, body, media_urls, parent_id, is_deleted, created_at
            FROM posts
            WHERE parent_id IS NULL
              AND is_deleted = FALSE
              AND created_at >= $1
              AND ($2::uuid IS NULL OR author_id <> $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(since)
        .bind(exclude_author)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ContentRecord::from).collect())
    }

    async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ContentRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT id, author_id, body, media_urls, parent_id, is_deleted, created_at
            FROM posts
            WHERE id = ANY($1) AND is_deleted = FALSE
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ContentRecord::from).collect())
    }

    async fn like_counts(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, u64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, (Uuid, i64)>(
            "SELECT post_id, COUNT(*) FROM post_likes WHERE post_id = ANY($1) GROUP BY post_id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts(rows))
    }

    async fn reply_counts(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, u64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, (Uuid, i64)>(
            r#"
            SELECT parent_id, COUNT(*)
            FROM posts
            WHERE parent_id = ANY($1) AND is_deleted = FALSE
            GROUP BY parent_id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts(rows))
    }

    async fn chronological(&self, exclude: &[Uuid], offset: u64, limit: usize) -> Result<Vec<ContentRecord>> {
        let offset = i64::try_from(offset)?;
        let rows = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT id, author_id, body, media_urls, parent_id, is_deleted, created_at
            FROM posts
            WHERE parent_id IS NULL
              AND is_deleted = FALSE
              AND NOT (id = ANY($1))
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "#,
        )
        .bind(exclude)
        .bind(offset)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ContentRecord::from).collect())
    }

    async fn seen_ids(&self, user_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT content_id FROM seen_posts WHERE user_id = $1 AND content_id = ANY($2)",
        )
        .bind(user_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn author_affinity(&self, user_id: Uuid, authors: &[Uuid]) -> Result<HashMap<Uuid, f64>> {
        if authors.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(Uuid, f64)> = sqlx::query_as(
            r#"
            SELECT target_user_id, weight
            FROM user_interactions
            WHERE user_id = $1 AND target_user_id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(authors)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }
}
