//! Append-only store and ingestion path for behavioral feed events.
//!
//! Events arrive in client batches, are validated against a per-type schema,
//! authorized against the calling user, and written in one batch insert with
//! a per-event fallback. Interaction-graph updates ride a bounded best-effort
//! pool and never block or fail the request.

pub mod analytics;
pub mod ingest;
pub mod store;
pub mod tasks;
pub mod validate;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use analytics::{AnalyticsReport, AnalyticsSummary, DailyPoint, TopContent};
pub use ingest::{IngestError, IngestOutcome, IngestRequest, Ingestor, SessionControl};
pub use store::{EventStore, PgEventStore, SessionUpdate};
pub use tasks::BestEffort;
pub use validate::{EventRejection, RawEvent};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryEventStore;
