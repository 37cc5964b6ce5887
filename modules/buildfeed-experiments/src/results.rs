//! Experiment results: per-variant metrics compared against the control arm.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use buildfeed_common::{Experiment, ExperimentStatus, Variant};

use crate::stats::{
    mean_ci, proportion_ci, relative_change, welch_t_test, z_test_proportions, ConfidenceLevel,
    Interval, TestOutcome,
};
use crate::store::{ExperimentStore, VariantAggregate};

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("experiment {0} not found")]
    NotFound(Uuid),

    #[error("experiment needs at least 2 variants, found {0}")]
    InsufficientVariants(usize),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
    pub value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// None for the control arm.
    pub p_value: Option<f64>,
    pub relative_change: f64,
    pub is_significant: bool,
}

impl MetricResult {
    fn baseline(value: f64, ci: Interval) -> Self {
        Self {
            value: finite(value),
            ci_lower: finite(ci.lower),
            ci_upper: finite(ci.upper),
            p_value: None,
            relative_change: 0.0,
            is_significant: false,
        }
    }

    fn compared(value: f64, ci: Interval, baseline: f64, test: TestOutcome) -> Self {
        Self {
            value: finite(value),
            ci_lower: finite(ci.lower),
            ci_upper: finite(ci.upper),
            p_value: Some(finite(test.p_value)),
            relative_change: finite(relative_change(value, baseline)),
            is_significant: test.is_significant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantMetrics {
    pub engagement_rate: MetricResult,
    pub click_through_rate: MetricResult,
    pub avg_dwell_ms: MetricResult,
}

impl VariantMetrics {
    fn any_significant(&self) -> bool {
        self.engagement_rate.is_significant
            || self.click_through_rate.is_significant
            || self.avg_dwell_ms.is_significant
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantResult {
    pub variant_id: Uuid,
    pub name: String,
    pub is_control: bool,
    pub sample_size: u64,
    pub impressions: u64,
    pub engagements: u64,
    pub clicks: u64,
    pub metrics: VariantMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ExperimentStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<&Experiment> for ExperimentSummary {
    fn from(exp: &Experiment) -> Self {
        Self {
            id: exp.id,
            name: exp.name.clone(),
            description: exp.description.clone(),
            status: exp.status,
            started_at: exp.started_at,
            ended_at: exp.ended_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentResults {
    pub experiment: ExperimentSummary,
    pub variants: Vec<VariantResult>,
    pub is_significant: bool,
    pub confidence_level: f64,
    /// Id of the winning variant, when any comparison is significant.
    pub winner: Option<Uuid>,
}

fn finite(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

fn rate(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

pub struct ExperimentAnalyzer {
    store: Arc<dyn ExperimentStore>,
    level: ConfidenceLevel,
}

impl ExperimentAnalyzer {
    pub fn new(store: Arc<dyn ExperimentStore>) -> Self {
        Self {
            store,
            level: ConfidenceLevel::default(),
        }
    }

    pub async fn results(&self, experiment_id: Uuid) -> Result<ExperimentResults, ExperimentError> {
        let experiment = self
            .store
            .get_experiment(experiment_id)
            .await?
            .ok_or(ExperimentError::NotFound(experiment_id))?;

        if experiment.variants.len() < 2 {
            return Err(ExperimentError::InsufficientVariants(experiment.variants.len()));
        }
        let control_id = experiment
            .control()
            .map(|v| v.id)
            .ok_or(ExperimentError::InsufficientVariants(0))?;

        let aggregates = try_join_all(
            experiment
                .variants
                .iter()
                .map(|v| self.store.variant_aggregate(experiment.id, v)),
        )
        .await?;

        let arms: Vec<(&Variant, VariantAggregate)> =
            experiment.variants.iter().zip(aggregates).collect();
        let control = arms
            .iter()
            .find(|(v, _)| v.id == control_id)
            .map(|(_, agg)| agg.clone())
            .unwrap_or_default();

        let variants: Vec<VariantResult> = arms
            .iter()
            .map(|(variant, agg)| {
                let is_control = variant.id == control_id;
                VariantResult {
                    variant_id: variant.id,
                    name: variant.name.clone(),
                    is_control,
                    sample_size: agg.sample_size,
                    impressions: agg.impressions,
                    engagements: agg.engagements,
                    clicks: agg.clicks,
                    metrics: self.metrics(agg, (!is_control).then_some(&control)),
                }
            })
            .collect();

        let is_significant = variants
            .iter()
            .any(|v| !v.is_control && v.metrics.any_significant());
        let winner = if is_significant {
            pick_winner(&variants)
        } else {
            None
        };

        info!(
            experiment_id = %experiment.id,
            variants = variants.len(),
            is_significant,
            winner = ?winner,
            "Computed experiment results"
        );

        Ok(ExperimentResults {
            experiment: ExperimentSummary::from(&experiment),
            variants,
            is_significant,
            confidence_level: self.level.as_fraction(),
            winner,
        })
    }

    fn metrics(&self, arm: &VariantAggregate, control: Option<&VariantAggregate>) -> VariantMetrics {
        let engagement = rate(arm.engagements, arm.impressions);
        let ctr = rate(arm.clicks, arm.impressions);
        let engagement_ci = proportion_ci(engagement, arm.impressions, self.level);
        let ctr_ci = proportion_ci(ctr, arm.impressions, self.level);
        let dwell_ci = mean_ci(arm.dwell, self.level);

        let Some(control) = control else {
            return VariantMetrics {
                engagement_rate: MetricResult::baseline(engagement, engagement_ci),
                click_through_rate: MetricResult::baseline(ctr, ctr_ci),
                avg_dwell_ms: MetricResult::baseline(arm.dwell.mean, dwell_ci),
            };
        };

        VariantMetrics {
            engagement_rate: MetricResult::compared(
                engagement,
                engagement_ci,
                rate(control.engagements, control.impressions),
                z_test_proportions(
                    control.engagements,
                    control.impressions,
                    arm.engagements,
                    arm.impressions,
                ),
            ),
            click_through_rate: MetricResult::compared(
                ctr,
                ctr_ci,
                rate(control.clicks, control.impressions),
                z_test_proportions(control.clicks, control.impressions, arm.clicks, arm.impressions),
            ),
            avg_dwell_ms: MetricResult::compared(
                arm.dwell.mean,
                dwell_ci,
                control.dwell.mean,
                welch_t_test(control.dwell, arm.dwell),
            ),
        }
    }
}

/// Start from the control; a significant variant takes over only with a
/// strictly higher engagement rate than the current best.
fn pick_winner(variants: &[VariantResult]) -> Option<Uuid> {
    let mut best = variants.iter().find(|v| v.is_control)?;
    for candidate in variants.iter().filter(|v| !v.is_control) {
        if candidate.metrics.any_significant()
            && candidate.metrics.engagement_rate.value > best.metrics.engagement_rate.value
        {
            best = candidate;
        }
    }
    Some(best.variant_id)
}
