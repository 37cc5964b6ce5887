use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use uuid::Uuid;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Web server
    pub web_host: String,
    pub web_port: u16,
    pub log_json: bool,

    // Abuse protection
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    pub maintenance_interval_secs: u64,

    pub feed: FeedSettings,
}

/// Tuning knobs for ranking, caching and ingestion.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub page_size: usize,
    pub ranked_cache_ttl_secs: u64,
    pub aggregate_cache_ttl_secs: u64,
    pub ranking_timeout_ms: u64,
    pub candidate_window_hours: i64,
    pub candidate_limit: usize,
    pub max_ranked: usize,
    pub affinity_weight: f64,
    /// Experiment whose variants tune the ranked feed, if any.
    pub feed_experiment_id: Option<Uuid>,
    pub max_batch_size: usize,
    pub best_effort_concurrency: usize,
    pub cache_max_entries: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            ranked_cache_ttl_secs: 300,
            aggregate_cache_ttl_secs: 60,
            ranking_timeout_ms: 800,
            candidate_window_hours: 72,
            candidate_limit: 200,
            max_ranked: 100,
            affinity_weight: 0.25,
            feed_experiment_id: None,
            max_batch_size: 100,
            best_effort_concurrency: 16,
            cache_max_entries: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    /// Only `DATABASE_URL` is required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let defaults = FeedSettings::default();
        let feed = FeedSettings {
            page_size: parse_env("FEED_PAGE_SIZE", defaults.page_size)?,
            ranked_cache_ttl_secs: parse_env("FEED_RANKED_TTL_SECS", defaults.ranked_cache_ttl_secs)?,
            aggregate_cache_ttl_secs: parse_env(
                "FEED_AGGREGATE_TTL_SECS",
                defaults.aggregate_cache_ttl_secs,
            )?,
            ranking_timeout_ms: parse_env("FEED_RANKING_TIMEOUT_MS", defaults.ranking_timeout_ms)?,
            candidate_window_hours: parse_env(
                "FEED_CANDIDATE_WINDOW_HOURS",
                defaults.candidate_window_hours,
            )?,
            candidate_limit: parse_env("FEED_CANDIDATE_LIMIT", defaults.candidate_limit)?,
            max_ranked: parse_env("FEED_MAX_RANKED", defaults.max_ranked)?,
            affinity_weight: parse_env("FEED_AFFINITY_WEIGHT", defaults.affinity_weight)?,
            feed_experiment_id: optional_env("FEED_EXPERIMENT_ID")?,
            max_batch_size: parse_env("FEED_MAX_BATCH", defaults.max_batch_size)?,
            best_effort_concurrency: parse_env(
                "BEST_EFFORT_CONCURRENCY",
                defaults.best_effort_concurrency,
            )?,
            cache_max_entries: parse_env("FEED_CACHE_MAX_ENTRIES", defaults.cache_max_entries)?,
        };

        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: parse_env("WEB_PORT", 3000)?,
            log_json: env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false),
            rate_limit_max: parse_env("RATE_LIMIT_MAX", 120)?,
            rate_limit_window_secs: parse_env("RATE_LIMIT_WINDOW_SECS", 60)?,
            maintenance_interval_secs: parse_env("MAINTENANCE_INTERVAL_SECS", 30)?,
            feed,
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} environment variable is required"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}

fn optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} is not valid")),
        _ => Ok(None),
    }
}
