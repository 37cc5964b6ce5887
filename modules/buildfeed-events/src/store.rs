//! EventStore: append-only behavioral event store backed by Postgres.
//!
//! Events are never updated or deleted. Inserts are idempotent on the event id
//! so that client retries of the same batch do not double count.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use buildfeed_common::{EventType, FeedEvent, Session};

use crate::analytics::{
    content_engagement_score, engagement_rate_pct, AnalyticsReport, AnalyticsSummary, DailyPoint,
    TopContent,
};

/// Heartbeat or end-of-visibility update for an existing session.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub at: DateTime<Utc>,
    pub ended: bool,
    pub event_count: Option<i32>,
    pub feed_depth: Option<i32>,
}

/// Persistence seam for everything the ingestion path writes.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a batch in one operation, recording seen markers for its
    /// impressions atomically. Returns the ids that were newly stored;
    /// events whose id already existed are left out.
    async fn insert_batch(&self, events: &[FeedEvent]) -> Result<Vec<Uuid>>;

    /// Insert one event. Returns false if the id was already stored.
    async fn insert_event(&self, event: &FeedEvent) -> Result<bool>;

    /// Record that a user has seen a content item. Returns false when the
    /// marker already existed.
    async fn mark_seen(&self, user_id: Uuid, content_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Add weight to the user→author interaction edge.
    async fn record_interaction(
        &self,
        user_id: Uuid,
        target_user_id: Uuid,
        weight: f64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Create or restart a session row.
    async fn start_session(&self, session: &Session) -> Result<()>;

    /// Update an existing session. Returns false when no row matched.
    async fn touch_session(&self, update: &SessionUpdate) -> Result<bool>;

    /// Aggregate events created at or after `since`.
    async fn analytics(&self, since: DateTime<Utc>, top_limit: usize) -> Result<AnalyticsReport>;
}

// ---------------------------------------------------------------------------
// PgEventStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT_EVENT_COLUMNS: &str = "INSERT INTO feed_events \
    (id, user_id, content_id, author_id, session_id, event_type, metadata, \
     experiment_id, variant, position, created_at) ";

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert_batch(&self, events: &[FeedEvent]) -> Result<Vec<Uuid>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        let mut insert = QueryBuilder::<Postgres>::new(INSERT_EVENT_COLUMNS);
        insert.push_values(events, |mut row, e| {
            row.push_bind(e.id)
                .push_bind(e.user_id)
                .push_bind(e.content_id)
                .push_bind(e.author_id)
                .push_bind(e.session_id)
                .push_bind(e.event_type.as_str())
                .push_bind(e.metadata.clone())
                .push_bind(e.experiment_id)
                .push_bind(e.variant.clone())
                .push_bind(e.position)
                .push_bind(e.created_at);
        });
        insert.push(" ON CONFLICT (id) DO NOTHING RETURNING id");
        let inserted: Vec<Uuid> = insert
            .build_query_scalar()
            .fetch_all(&mut *tx)
            .await?;

        let mut pairs = HashSet::new();
        let seen: Vec<&FeedEvent> = events
            .iter()
            .filter(|e| e.event_type == EventType::Impression)
            .filter(|e| pairs.insert((e.user_id, e.content_id)))
            .collect();
        if !seen.is_empty() {
            let mut markers =
                QueryBuilder::<Postgres>::new("INSERT INTO seen_posts (user_id, content_id, seen_at) ");
            markers.push_values(seen, |mut row, e| {
                row.push_bind(e.user_id)
                    .push_bind(e.content_id)
                    .push_bind(e.created_at);
            });
            markers.push(" ON CONFLICT (user_id, content_id) DO NOTHING");
            markers.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn insert_event(&self, event: &FeedEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO feed_events
                (id, user_id, content_id, author_id, session_id, event_type, metadata,
                 experiment_id, variant, position, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.content_id)
        .bind(event.author_id)
        .bind(event.session_id)
        .bind(event.event_type.as_str())
        .bind(&event.metadata)
        .bind(event.experiment_id)
        .bind(&event.variant)
        .bind(event.position)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_seen(&self, user_id: Uuid, content_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO seen_posts (user_id, content_id, seen_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, content_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(content_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_interaction(
        &self,
        user_id: Uuid,
        target_user_id: Uuid,
        weight: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_interactions
                (user_id, target_user_id, weight, interaction_count, last_interaction_at)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (user_id, target_user_id)
            DO UPDATE SET weight = user_interactions.weight + EXCLUDED.weight,
                          interaction_count = user_interactions.interaction_count + 1,
                          last_interaction_at = GREATEST(user_interactions.last_interaction_at,
                                                         EXCLUDED.last_interaction_at)
            "#,
        )
        .bind(user_id)
        .bind(target_user_id)
        .bind(weight)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn start_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feed_sessions
                (id, user_id, device_type, started_at, ended_at, last_active_at, event_count, feed_depth)
            VALUES ($1, $2, $3, $4, NULL, $5, $6, $7)
            ON CONFLICT (id)
            DO UPDATE SET device_type = EXCLUDED.device_type,
                          last_active_at = EXCLUDED.last_active_at,
                          ended_at = NULL
            WHERE feed_sessions.user_id = EXCLUDED.user_id
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.device_type.as_str())
        .bind(session.started_at)
        .bind(session.last_active_at)
        .bind(session.event_count)
        .bind(session.feed_depth)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch_session(&self, update: &SessionUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE feed_sessions
            SET last_active_at = $3,
                ended_at = CASE WHEN $4 THEN $3 ELSE ended_at END,
                event_count = COALESCE($5, event_count),
                feed_depth = GREATEST(feed_depth, COALESCE($6, feed_depth))
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(update.id)
        .bind(update.user_id)
        .bind(update.at)
        .bind(update.ended)
        .bind(update.event_count)
        .bind(update.feed_depth)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn analytics(&self, since: DateTime<Utc>, top_limit: usize) -> Result<AnalyticsReport> {
        let engagement = EventType::engagement_labels();

        let summary = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE event_type = 'impression') AS impressions,
                COUNT(*) FILTER (WHERE event_type = ANY($2)) AS engagements,
                AVG((metadata->>'dwell_ms')::float8) FILTER (WHERE event_type = 'dwell') AS avg_dwell_ms,
                COUNT(DISTINCT user_id) AS unique_users
            FROM feed_events
            WHERE created_at >= $1
            "#,
        )
        .bind(since)
        .bind(&engagement)
        .fetch_one(&self.pool);

        let daily = sqlx::query_as::<_, DailyRow>(
            r#"
            SELECT
                (created_at AT TIME ZONE 'UTC')::date AS day,
                COUNT(*) FILTER (WHERE event_type = 'impression') AS impressions,
                COUNT(*) FILTER (WHERE event_type = ANY($2)) AS engagements,
                COUNT(DISTINCT user_id) AS unique_users
            FROM feed_events
            WHERE created_at >= $1
            GROUP BY day
            ORDER BY day ASC
            "#,
        )
        .bind(since)
        .bind(&engagement)
        .fetch_all(&self.pool);

        let top = sqlx::query_as::<_, TopContentRow>(
            r#"
            SELECT * FROM (
                SELECT
                    content_id,
                    COUNT(*) FILTER (WHERE event_type = 'impression') AS impressions,
                    COUNT(*) FILTER (WHERE event_type = ANY($2)) AS engagements,
                    COUNT(*) FILTER (WHERE event_type = 'like') AS likes,
                    COUNT(*) FILTER (WHERE event_type = 'reply') AS replies,
                    COUNT(*) FILTER (WHERE event_type = 'share') AS shares,
                    COUNT(*) FILTER (WHERE event_type = 'bookmark') AS bookmarks,
                    COUNT(*) FILTER (WHERE event_type = 'click') AS clicks
                FROM feed_events
                WHERE created_at >= $1
                GROUP BY content_id
            ) per_content
            ORDER BY (likes * 3 + replies * 5 + shares * 4 + bookmarks * 2 + clicks) DESC, content_id
            LIMIT $3
            "#,
        )
        .bind(since)
        .bind(&engagement)
        .bind(top_limit as i64)
        .fetch_all(&self.pool);

        let (summary, daily, top) = tokio::try_join!(summary, daily, top)?;

        let total_impressions = summary.impressions.max(0) as u64;
        let total_engagements = summary.engagements.max(0) as u64;
        Ok(AnalyticsReport {
            since,
            summary: AnalyticsSummary {
                total_impressions,
                total_engagements,
                engagement_rate: engagement_rate_pct(total_engagements, total_impressions),
                avg_dwell_ms: summary.avg_dwell_ms.unwrap_or(0.0).max(0.0).round() as u64,
                unique_users: summary.unique_users.max(0) as u64,
            },
            daily: daily
                .into_iter()
                .map(|d| DailyPoint {
                    date: d.day,
                    impressions: d.impressions.max(0) as u64,
                    engagements: d.engagements.max(0) as u64,
                    unique_users: d.unique_users.max(0) as u64,
                })
                .collect(),
            top_content: top
                .into_iter()
                .map(|t| TopContent {
                    content_id: t.content_id,
                    impressions: t.impressions.max(0) as u64,
                    engagements: t.engagements.max(0) as u64,
                    engagement_score: content_engagement_score(
                        t.likes.max(0) as u64,
                        t.replies.max(0) as u64,
                        t.shares.max(0) as u64,
                        t.bookmarks.max(0) as u64,
                        t.clicks.max(0) as u64,
                    ),
                })
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct SummaryRow {
    impressions: i64,
    engagements: i64,
    avg_dwell_ms: Option<f64>,
    unique_users: i64,
}

#[derive(sqlx::FromRow)]
struct DailyRow {
    day: NaiveDate,
    impressions: i64,
    engagements: i64,
    unique_users: i64,
}

#[derive(sqlx::FromRow)]
struct TopContentRow {
    content_id: Uuid,
    impressions: i64,
    engagements: i64,
    likes: i64,
    replies: i64,
    shares: i64,
    bookmarks: i64,
    clicks: i64,
}
