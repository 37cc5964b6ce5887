//! A/B experimentation: stable variant assignment and the statistics engine
//! that turns per-variant event aggregates into significance and a winner.

pub mod assignment;
pub mod results;
pub mod special;
pub mod stats;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use assignment::{bucket, pick_variant, ExperimentAssigner};
pub use results::{
    ExperimentAnalyzer, ExperimentError, ExperimentResults, ExperimentSummary, MetricResult,
    VariantMetrics, VariantResult,
};
pub use stats::{ConfidenceLevel, Interval, SampleStats, TestOutcome};
pub use store::{ExperimentStore, PgExperimentStore, VariantAggregate};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryExperimentStore;
