//! ExperimentStore: experiment definitions, assignments and per-arm aggregates.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use buildfeed_common::{Assignment, EventType, Experiment, ExperimentStatus, FeedEvent, Variant};

use crate::stats::SampleStats;

/// Event counts for one variant, restricted to users actually assigned to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VariantAggregate {
    /// Users assigned to the variant.
    pub sample_size: u64,
    pub impressions: u64,
    pub engagements: u64,
    pub clicks: u64,
    pub dwell: SampleStats,
}

impl VariantAggregate {
    /// Aggregate raw events the way the Postgres store does: only events tagged
    /// with this experiment and variant label, from users in `assigned`.
    pub fn from_events(
        events: &[FeedEvent],
        experiment_id: Uuid,
        variant: &Variant,
        assigned: &HashSet<Uuid>,
    ) -> Self {
        let mut agg = VariantAggregate {
            sample_size: assigned.len() as u64,
            ..Default::default()
        };
        let mut dwell = Vec::new();

        let tagged = events.iter().filter(|e| {
            e.experiment_id == Some(experiment_id)
                && e.variant.as_deref() == Some(variant.name.as_str())
                && assigned.contains(&e.user_id)
        });
        for event in tagged {
            match event.event_type {
                EventType::Impression => agg.impressions += 1,
                EventType::Click => agg.clicks += 1,
                EventType::Dwell => dwell.extend(event.dwell_ms()),
                _ => {}
            }
            if event.event_type.is_engagement() {
                agg.engagements += 1;
            }
        }

        agg.dwell = sample_stats(&dwell);
        agg
    }
}

fn sample_stats(values: &[f64]) -> SampleStats {
    let n = values.len();
    if n == 0 {
        return SampleStats::default();
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = if n < 2 {
        0.0
    } else {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    };
    SampleStats {
        mean,
        variance,
        n: n as u64,
    }
}

#[async_trait]
pub trait ExperimentStore: Send + Sync {
    /// Load an experiment with its variants ordered by position.
    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>>;

    async fn get_assignment(&self, experiment_id: Uuid, user_id: Uuid) -> Result<Option<Assignment>>;

    /// Persist an assignment unless one already exists, then return the
    /// stored row. Concurrent first requests converge on a single variant.
    async fn insert_assignment(
        &self,
        experiment_id: Uuid,
        user_id: Uuid,
        variant_id: Uuid,
    ) -> Result<Assignment>;

    async fn variant_aggregate(&self, experiment_id: Uuid, variant: &Variant) -> Result<VariantAggregate>;
}

// ---------------------------------------------------------------------------
// PgExperimentStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgExperimentStore {
    pool: PgPool,
}

impl PgExperimentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExperimentStore for PgExperimentStore {
    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>> {
        let experiment = sqlx::query_as::<_, ExperimentRow>(
            "SELECT id, name, description, status, started_at, ended_at FROM experiments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool);

        let variants = sqlx::query_as::<_, VariantRow>(
            r#"
            SELECT id, experiment_id, name, weight, is_control, position, config
            FROM experiment_variants
            WHERE experiment_id = $1
            ORDER BY position ASC, name ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool);

        let (experiment, variants) = tokio::try_join!(experiment, variants)?;

        Ok(experiment.map(|row| Experiment {
            id: row.id,
            name: row.name,
            description: row.description,
            status: ExperimentStatus::from_label(&row.status),
            started_at: row.started_at,
            ended_at: row.ended_at,
            variants: variants.into_iter().map(Variant::from).collect(),
        }))
    }

    async fn get_assignment(&self, experiment_id: Uuid, user_id: Uuid) -> Result<Option<Assignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT a.experiment_id, a.user_id, a.variant_id, v.name AS variant, v.config
            FROM experiment_assignments a
            JOIN experiment_variants v ON v.id = a.variant_id
            WHERE a.experiment_id = $1 AND a.user_id = $2
            "#,
        )
        .bind(experiment_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Assignment::from))
    }

    async fn insert_assignment(
        &self,
        experiment_id: Uuid,
        user_id: Uuid,
        variant_id: Uuid,
    ) -> Result<Assignment> {
        sqlx::query(
            r#"
            INSERT INTO experiment_assignments (experiment_id, user_id, variant_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (experiment_id, user_id) DO NOTHING
            "#,
        )
        .bind(experiment_id)
        .bind(user_id)
        .bind(variant_id)
        .execute(&self.pool)
        .await?;

        self.get_assignment(experiment_id, user_id)
            .await?
            .ok_or_else(|| anyhow!("assignment for {user_id} in {experiment_id} missing after insert"))
    }

    async fn variant_aggregate(&self, experiment_id: Uuid, variant: &Variant) -> Result<VariantAggregate> {
        let row = sqlx::query_as::<_, AggregateRow>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM experiment_assignments
                  WHERE experiment_id = $1 AND variant_id = $2) AS sample_size,
                COUNT(*) FILTER (WHERE e.event_type = 'impression') AS impressions,
                COUNT(*) FILTER (WHERE e.event_type = ANY($4)) AS engagements,
                COUNT(*) FILTER (WHERE e.event_type = 'click') AS clicks,
                COUNT(*) FILTER (WHERE e.event_type = 'dwell'
                                   AND e.metadata->>'dwell_ms' IS NOT NULL) AS dwell_count,
                AVG((e.metadata->>'dwell_ms')::float8) FILTER (WHERE e.event_type = 'dwell') AS dwell_mean,
                VAR_SAMP((e.metadata->>'dwell_ms')::float8) FILTER (WHERE e.event_type = 'dwell') AS dwell_variance
            FROM feed_events e
            JOIN experiment_assignments a
              ON a.experiment_id = e.experiment_id
             AND a.user_id = e.user_id
             AND a.variant_id = $2
            WHERE e.experiment_id = $1 AND e.variant = $3
            "#,
        )
        .bind(experiment_id)
        .bind(variant.id)
        .bind(&variant.name)
        .bind(EventType::engagement_labels())
        .fetch_one(&self.pool)
        .await?;

        Ok(VariantAggregate {
            sample_size: row.sample_size.max(0) as u64,
            impressions: row.impressions.max(0) as u64,
            engagements: row.engagements.max(0) as u64,
            clicks: row.clicks.max(0) as u64,
            dwell: SampleStats {
                mean: row.dwell_mean.unwrap_or(0.0),
                variance: row.dwell_variance.unwrap_or(0.0),
                n: row.dwell_count.max(0) as u64,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct ExperimentRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    status: String,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    id: Uuid,
    experiment_id: Uuid,
    name: String,
    weight: i32,
    is_control: bool,
    position: i32,
    config: serde_json::Value,
}

impl From<VariantRow> for Variant {
    fn from(row: VariantRow) -> Self {
        Variant {
            id: row.id,
            experiment_id: row.experiment_id,
            name: row.name,
            weight: row.weight.max(0) as u32,
            is_control: row.is_control,
            position: row.position,
            config: row.config,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    experiment_id: Uuid,
    user_id: Uuid,
    variant_id: Uuid,
    variant: String,
    config: serde_json::Value,
}

impl From<AssignmentRow> for Assignment {
    fn from(row: AssignmentRow) -> Self {
        Assignment {
            experiment_id: row.experiment_id,
            user_id: row.user_id,
            variant_id: row.variant_id,
            variant: row.variant,
            config: row.config,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AggregateRow {
    sample_size: i64,
    impressions: i64,
    engagements: i64,
    clicks: i64,
    dwell_count: i64,
    dwell_mean: Option<f64>,
    dwell_variance: Option<f64>,
}
