//! Feed ranking: engagement scoring, the per-instance feed cache, the
//! personalized ranking pipeline with its chronological fallback, and the
//! trending aggregates.

pub mod cache;
pub mod content;
pub mod fallback;
pub mod feed;
pub mod hydrate;
pub mod pipeline;
pub mod scoring;
pub mod trending;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use cache::FeedCache;
pub use content::{ContentStore, PgContentStore};
pub use fallback::{ChronologicalFeed, ChronologicalPage};
pub use feed::{FeedPage, FeedRequest, FeedService};
pub use pipeline::{RankOutcome, RankedEntry, RankedPage, RankingParams, RankingPipeline};
pub use trending::{CacheStatus, RisingBuilder, TrendingAggregator};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryContentStore;
