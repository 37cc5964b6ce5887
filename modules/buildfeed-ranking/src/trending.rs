//! Trending posts and rising builders: batch-scored windows of recent content,
//! cached per (kind, hours, limit).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use buildfeed_common::ContentItem;

use crate::cache::{keys, FeedCache};
use crate::content::ContentStore;
use crate::scoring::{age_hours, engagement_score};

pub const DEFAULT_HOURS: u32 = 24;
pub const MAX_HOURS: u32 = 168;
pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 50;

/// Upper bound on posts scored per window.
const WINDOW_CANDIDATES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RisingBuilder {
    pub author_id: Uuid,
    pub score: f64,
    pub post_count: u64,
    pub total_likes: u64,
    pub total_replies: u64,
}

/// Clamp hours to 1..=168 and limit to 1..=50.
pub fn clamp_window(hours: Option<u32>, limit: Option<usize>) -> (u32, usize) {
    (
        hours.unwrap_or(DEFAULT_HOURS).clamp(1, MAX_HOURS),
        limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
    )
}

pub struct TrendingAggregator {
    content: Arc<dyn ContentStore>,
    cache: Arc<FeedCache>,
    ttl: Duration,
}

impl TrendingAggregator {
    pub fn new(content: Arc<dyn ContentStore>, cache: Arc<FeedCache>, ttl: Duration) -> Self {
        Self { content, cache, ttl }
    }

    pub async fn trending_posts(&self, hours: u32, limit: usize) -> Result<(Vec<ContentItem>, CacheStatus)> {
        let key = keys::trending_posts(hours, limit);
        if let Some(hit) = self.cached(&key) {
            return Ok((hit, CacheStatus::Hit));
        }

        let mut posts = self.score_window(hours).await?;
        posts.truncate(limit);
        self.store(&key, &posts);
        Ok((posts, CacheStatus::Miss))
    }

    /// Authors ranked by the summed score of their posts in the window.
    pub async fn rising_builders(&self, hours: u32, limit: usize) -> Result<(Vec<RisingBuilder>, CacheStatus)> {
        let key = keys::trending_builders(hours, limit);
        if let Some(hit) = self.cached(&key) {
            return Ok((hit, CacheStatus::Hit));
        }

        let mut by_author: HashMap<Uuid, RisingBuilder> = HashMap::new();
        for post in self.score_window(hours).await? {
            let builder = by_author.entry(post.author_id).or_insert_with(|| RisingBuilder {
                author_id: post.author_id,
                score: 0.0,
                post_count: 0,
                total_likes: 0,
                total_replies: 0,
            });
            builder.score += post.score.unwrap_or(0.0);
            builder.post_count += 1;
            builder.total_likes += post.likes;
            builder.total_replies += post.replies;
        }

        let mut builders: Vec<RisingBuilder> = by_author
            .into_values()
            .map(|mut b| {
                b.score = (b.score * 10.0).round() / 10.0;
                b
            })
            .collect();
        builders.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.author_id.cmp(&b.author_id))
        });
        builders.truncate(limit);

        self.store(&key, &builders);
        Ok((builders, CacheStatus::Miss))
    }

    /// Drop cached trending lists and ranked feeds after content changes.
    pub fn invalidate_content(&self) {
        let trending = self.cache.clear_by_prefix(keys::TRENDING_PREFIX);
        let feeds = self.cache.clear_by_prefix(keys::RANKED_FEED_PREFIX);
        debug!(trending, feeds, "Invalidated content caches");
    }

    /// Every top-level post of the window, scored, highest first.
    async fn score_window(&self, hours: u32) -> Result<Vec<ContentItem>> {
        let now = Utc::now();
        let since = now - chrono::Duration::hours(i64::from(hours));
        let records = self
            .content
            .recent_candidates(since, None, WINDOW_CANDIDATES)
            .await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let (likes, replies) = tokio::try_join!(self.content.like_counts(&ids), self.content.reply_counts(&ids))?;

        let mut items: Vec<ContentItem> = records
            .into_iter()
            .map(|record| {
                let id = record.id;
                let age = age_hours(record.created_at, now);
                let (l, r) = (
                    likes.get(&id).copied().unwrap_or(0),
                    replies.get(&id).copied().unwrap_or(0),
                );
                let score = engagement_score(l, r, record.media_count(), age);
                ContentItem::hydrate(record, l, r).with_score(score)
            })
            .collect();
        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(items)
    }

    fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get_json(key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable cache entry");
                None
            }
        }
    }

    fn store<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.cache.set_json(key, value, self.ttl) {
            warn!(key, error = %e, "Failed to cache aggregate");
        }
    }
}
