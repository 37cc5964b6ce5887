//! Personalized ranking.
//!
//! A ranked list is computed once per user, cached under
//! `feed:ranked:{user}`, and paged through with an opaque cursor. Any failure
//! inside the pipeline (store error, bad cursor, timeout) is absorbed here and
//! reported as an empty `Failed` page so the caller can fall back.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use buildfeed_common::{Assignment, FeedSettings};
use buildfeed_experiments::ExperimentAssigner;

use crate::cache::{keys, FeedCache};
use crate::content::ContentStore;
use crate::scoring::{age_hours, engagement_score};

const CURSOR_VERSION: &str = "v1";

#[derive(Debug, Error)]
pub enum RankError {
    #[error("malformed cursor")]
    InvalidCursor,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Encode a resume position as an opaque, URL-safe cursor.
pub fn encode_cursor(position: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("{CURSOR_VERSION}:{position}"))
}

pub fn decode_cursor(cursor: &str) -> Result<usize, RankError> {
    let raw = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| RankError::InvalidCursor)?;
    let raw = String::from_utf8(raw).map_err(|_| RankError::InvalidCursor)?;
    match raw.split_once(':') {
        Some((CURSOR_VERSION, position)) => position.parse().map_err(|_| RankError::InvalidCursor),
        _ => Err(RankError::InvalidCursor),
    }
}

/// The cached result of one ranking computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub ids: Vec<Uuid>,
    pub experiment_id: Option<Uuid>,
    pub variant: Option<String>,
    pub ranked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankOutcome {
    Ranked,
    /// No rankable candidates (or the cursor is past the end).
    Empty,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedPage {
    pub ids: Vec<Uuid>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub experiment_id: Option<Uuid>,
    pub variant: Option<String>,
    pub outcome: RankOutcome,
}

impl RankedPage {
    fn empty(outcome: RankOutcome) -> Self {
        Self {
            ids: Vec::new(),
            has_more: false,
            next_cursor: None,
            experiment_id: None,
            variant: None,
            outcome,
        }
    }
}

/// One year. Longer windows are rejected as overrides.
const MAX_CANDIDATE_WINDOW_HOURS: i64 = 24 * 365;

/// Ranking knobs that a feed experiment variant may override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingParams {
    pub candidate_window_hours: i64,
    pub affinity_weight: f64,
}

impl RankingParams {
    pub fn from_settings(settings: &FeedSettings) -> Self {
        Self {
            candidate_window_hours: settings.candidate_window_hours,
            affinity_weight: settings.affinity_weight,
        }
    }

    /// Apply a variant's `config` overrides. Unknown keys and out-of-range
    /// values are ignored.
    pub fn with_overrides(mut self, config: &serde_json::Value) -> Self {
        if let Some(hours) = config
            .get("candidate_window_hours")
            .and_then(|v| v.as_i64())
            .filter(|h| (1..=MAX_CANDIDATE_WINDOW_HOURS).contains(h))
        {
            self.candidate_window_hours = hours;
        }
        if let Some(weight) = config
            .get("affinity_weight")
            .and_then(|v| v.as_f64())
            .filter(|w| w.is_finite() && *w >= 0.0)
        {
            self.affinity_weight = weight;
        }
        self
    }
}

pub struct RankingPipeline {
    content: Arc<dyn ContentStore>,
    cache: Arc<FeedCache>,
    assigner: Arc<ExperimentAssigner>,
    settings: FeedSettings,
}

impl RankingPipeline {
    pub fn new(
        content: Arc<dyn ContentStore>,
        cache: Arc<FeedCache>,
        assigner: Arc<ExperimentAssigner>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            content,
            cache,
            assigner,
            settings,
        }
    }

    /// Produce one page of the user's ranked feed. Never fails: errors and
    /// timeouts come back as an empty page with outcome `Failed`.
    pub async fn rank(&self, user_id: Uuid, cursor: Option<&str>) -> RankedPage {
        let budget = Duration::from_millis(self.settings.ranking_timeout_ms);
        match tokio::time::timeout(budget, self.try_rank(user_id, cursor)).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                warn!(user_id = %user_id, error = %e, "Ranking failed, falling back");
                RankedPage::empty(RankOutcome::Failed)
            }
            Err(_) => {
                warn!(
                    user_id = %user_id,
                    timeout_ms = self.settings.ranking_timeout_ms,
                    "Ranking timed out, falling back"
                );
                RankedPage::empty(RankOutcome::Failed)
            }
        }
    }

    async fn try_rank(&self, user_id: Uuid, cursor: Option<&str>) -> Result<RankedPage, RankError> {
        let position = cursor.map(decode_cursor).transpose()?.unwrap_or(0);

        // A fresh request always re-ranks; continuations reuse the cached list.
        let cached = match cursor {
            Some(_) => self.cached_entry(user_id),
            None => None,
        };
        let entry = match cached {
            Some(entry) => entry,
            None => self.compute(user_id).await?,
        };

        if position >= entry.ids.len() {
            return Ok(RankedPage {
                experiment_id: entry.experiment_id,
                variant: entry.variant,
                ..RankedPage::empty(RankOutcome::Empty)
            });
        }

        // The last page still gets a cursor: it points past the end, which
        // resumes in the chronological feed.
        let end = (position + self.settings.page_size.max(1)).min(entry.ids.len());
        Ok(RankedPage {
            ids: entry.ids[position..end].to_vec(),
            has_more: end < entry.ids.len(),
            next_cursor: Some(encode_cursor(end)),
            experiment_id: entry.experiment_id,
            variant: entry.variant,
            outcome: RankOutcome::Ranked,
        })
    }

    fn cached_entry(&self, user_id: Uuid) -> Option<RankedEntry> {
        match self.cache.get_json::<RankedEntry>(&keys::ranked_feed(user_id)) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Discarding unreadable ranked entry");
                None
            }
        }
    }

    async fn feed_assignment(&self, user_id: Uuid) -> Option<Assignment> {
        let experiment_id = self.settings.feed_experiment_id?;
        match self.assigner.assign(experiment_id, user_id).await {
            Ok(assignment) => assignment,
            Err(e) => {
                warn!(experiment_id = %experiment_id, error = %e, "Feed experiment assignment failed");
                None
            }
        }
    }

    async fn compute(&self, user_id: Uuid) -> Result<RankedEntry, RankError> {
        let assignment = self.feed_assignment(user_id).await;
        let params = match &assignment {
            Some(a) => RankingParams::from_settings(&self.settings).with_overrides(&a.config),
            None => RankingParams::from_settings(&self.settings),
        };

        let now = Utc::now();
        let since = now - chrono::Duration::hours(params.candidate_window_hours);
        let candidates = self
            .content
            .recent_candidates(since, Some(user_id), self.settings.candidate_limit)
            .await?;

        let mut entry = RankedEntry {
            ids: Vec::new(),
            experiment_id: assignment.as_ref().map(|a| a.experiment_id),
            variant: assignment.map(|a| a.variant),
            ranked_at: now,
        };
        if candidates.is_empty() {
            debug!(user_id = %user_id, "No ranking candidates");
            return Ok(entry);
        }

        let ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
        let authors: Vec<Uuid> = candidates
            .iter()
            .map(|c| c.author_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let (likes, replies, seen, affinity) = tokio::try_join!(
            self.content.like_counts(&ids),
            self.content.reply_counts(&ids),
            self.content.seen_ids(user_id, &ids),
            self.content.author_affinity(user_id, &authors),
        )?;

        let max_affinity = affinity.values().copied().fold(0.0_f64, f64::max);
        let mut scored: Vec<(f64, DateTime<Utc>, Uuid)> = candidates
            .iter()
            .filter(|c| !seen.contains(&c.id))
            .map(|c| {
                let base = engagement_score(
                    likes.get(&c.id).copied().unwrap_or(0),
                    replies.get(&c.id).copied().unwrap_or(0),
                    c.media_count(),
                    age_hours(c.created_at, now),
                );
                let normalized = if max_affinity > 0.0 {
                    affinity.get(&c.author_id).copied().unwrap_or(0.0).max(0.0) / max_affinity
                } else {
                    0.0
                };
                (base * (1.0 + params.affinity_weight * normalized), c.created_at, c.id)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        scored.truncate(self.settings.max_ranked);
        entry.ids = scored.into_iter().map(|(_, _, id)| id).collect();

        if !entry.ids.is_empty() {
            let ttl = Duration::from_secs(self.settings.ranked_cache_ttl_secs);
            if let Err(e) = self.cache.set_json(&keys::ranked_feed(user_id), &entry, ttl) {
                warn!(user_id = %user_id, error = %e, "Failed to cache ranked entry");
            }
        }

        debug!(
            user_id = %user_id,
            candidates = candidates.len(),
            ranked = entry.ids.len(),
            variant = entry.variant.as_deref().unwrap_or("-"),
            "Ranked feed"
        );
        Ok(entry)
    }
}
