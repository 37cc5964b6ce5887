use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use buildfeed_common::{Config, FeedSettings};
use buildfeed_events::{BestEffort, EventStore, Ingestor, PgEventStore};
use buildfeed_experiments::{ExperimentAnalyzer, ExperimentAssigner, ExperimentStore, PgExperimentStore};
use buildfeed_ranking::{
    ChronologicalFeed, ContentStore, FeedCache, FeedService, PgContentStore, RankingPipeline,
    TrendingAggregator,
};

use crate::rate_limit::RateLimiter;

/// Storage backends the service is wired against.
pub struct Stores {
    pub content: Arc<dyn ContentStore>,
    pub events: Arc<dyn EventStore>,
    pub experiments: Arc<dyn ExperimentStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            content: Arc::new(PgContentStore::new(pool.clone())),
            events: Arc::new(PgEventStore::new(pool.clone())),
            experiments: Arc::new(PgExperimentStore::new(pool)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_requests: u32,
    pub window: Duration,
}

impl Limits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_requests: config.rate_limit_max,
            window: Duration::from_secs(config.rate_limit_window_secs),
        }
    }
}

pub struct AppState {
    pub feed: FeedService,
    pub ingestor: Ingestor,
    pub assigner: Arc<ExperimentAssigner>,
    pub analyzer: ExperimentAnalyzer,
    pub trending: TrendingAggregator,
    pub events: Arc<dyn EventStore>,
    pub cache: Arc<FeedCache>,
    pub limiter: RateLimiter,
    pub tasks: Arc<BestEffort>,
    pub aggregate_ttl: Duration,
}

impl AppState {
    pub fn new(stores: Stores, settings: FeedSettings, limits: Limits) -> Self {
        let cache = Arc::new(FeedCache::new(settings.cache_max_entries));
        let tasks = Arc::new(BestEffort::new(settings.best_effort_concurrency));
        let aggregate_ttl = Duration::from_secs(settings.aggregate_cache_ttl_secs);
        let assigner = Arc::new(ExperimentAssigner::new(stores.experiments.clone()));

        let chronological =
            ChronologicalFeed::new(stores.content.clone(), cache.clone(), settings.page_size);
        let ingestor = Ingestor::new(stores.events.clone(), tasks.clone(), settings.max_batch_size);
        let trending = TrendingAggregator::new(stores.content.clone(), cache.clone(), aggregate_ttl);
        let pipeline = RankingPipeline::new(
            stores.content.clone(),
            cache.clone(),
            assigner.clone(),
            settings,
        );

        Self {
            feed: FeedService::new(pipeline, chronological, stores.content),
            ingestor,
            assigner,
            analyzer: ExperimentAnalyzer::new(stores.experiments),
            trending,
            events: stores.events,
            cache,
            limiter: RateLimiter::new(limits.max_requests, limits.window),
            tasks,
            aggregate_ttl,
        }
    }

    /// Release per-instance state once the server has stopped accepting
    /// requests.
    pub async fn shutdown(&self) {
        self.tasks.drain().await;
        self.cache.clear();
        self.limiter.clear().await;
    }
}
