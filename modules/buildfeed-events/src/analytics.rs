//! Engagement analytics over the event log.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use buildfeed_common::{EventType, FeedEvent};

pub const DEFAULT_DAYS: u32 = 30;
pub const MAX_DAYS: u32 = 90;
pub const TOP_CONTENT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_impressions: u64,
    pub total_engagements: u64,
    /// Engagements per impression, as a percentage rounded to 2 decimals.
    pub engagement_rate: f64,
    pub avg_dwell_ms: u64,
    pub unique_users: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub impressions: u64,
    pub engagements: u64,
    pub unique_users: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopContent {
    pub content_id: Uuid,
    pub impressions: u64,
    pub engagements: u64,
    pub engagement_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub since: DateTime<Utc>,
    pub summary: AnalyticsSummary,
    pub daily: Vec<DailyPoint>,
    pub top_content: Vec<TopContent>,
}

/// Clamp a requested look-back window to 1..=90 days.
pub fn clamp_days(days: Option<u32>) -> u32 {
    days.unwrap_or(DEFAULT_DAYS).clamp(1, MAX_DAYS)
}

pub fn engagement_rate_pct(engagements: u64, impressions: u64) -> f64 {
    if impressions == 0 {
        return 0.0;
    }
    let pct = engagements as f64 / impressions as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

/// Weighted engagement score used to rank content in analytics.
pub fn content_engagement_score(likes: u64, replies: u64, shares: u64, bookmarks: u64, clicks: u64) -> f64 {
    (likes * 3 + replies * 5 + shares * 4 + bookmarks * 2 + clicks) as f64
}

#[derive(Default)]
struct ContentTally {
    impressions: u64,
    engagements: u64,
    likes: u64,
    replies: u64,
    shares: u64,
    bookmarks: u64,
    clicks: u64,
}

#[derive(Default)]
struct DayTally {
    impressions: u64,
    engagements: u64,
    users: HashSet<Uuid>,
}

impl AnalyticsReport {
    /// Build the report from raw events. Mirrors the SQL aggregation of the
    /// Postgres store.
    pub fn from_events(events: &[FeedEvent], since: DateTime<Utc>, top_limit: usize) -> Self {
        let mut impressions = 0u64;
        let mut engagements = 0u64;
        let mut dwell_total = 0.0f64;
        let mut dwell_count = 0u64;
        let mut users = HashSet::new();
        let mut days: BTreeMap<NaiveDate, DayTally> = BTreeMap::new();
        let mut content: HashMap<Uuid, ContentTally> = HashMap::new();

        for event in events.iter().filter(|e| e.created_at >= since) {
            users.insert(event.user_id);
            let day = days.entry(event.created_at.date_naive()).or_default();
            day.users.insert(event.user_id);
            let tally = content.entry(event.content_id).or_default();

            if event.event_type == EventType::Impression {
                impressions += 1;
                day.impressions += 1;
                tally.impressions += 1;
            }
            if event.event_type.is_engagement() {
                engagements += 1;
                day.engagements += 1;
                tally.engagements += 1;
            }
            match event.event_type {
                EventType::Like => tally.likes += 1,
                EventType::Reply => tally.replies += 1,
                EventType::Share => tally.shares += 1,
                EventType::Bookmark => tally.bookmarks += 1,
                EventType::Click => tally.clicks += 1,
                _ => {}
            }
            if let Some(ms) = event.dwell_ms() {
                dwell_total += ms;
                dwell_count += 1;
            }
        }

        let avg_dwell_ms = if dwell_count == 0 {
            0
        } else {
            (dwell_total / dwell_count as f64).max(0.0).round() as u64
        };

        let mut top_content: Vec<TopContent> = content
            .into_iter()
            .map(|(content_id, t)| TopContent {
                content_id,
                impressions: t.impressions,
                engagements: t.engagements,
                engagement_score: content_engagement_score(
                    t.likes,
                    t.replies,
                    t.shares,
                    t.bookmarks,
                    t.clicks,
                ),
            })
            .collect();
        top_content.sort_by(|a, b| {
            b.engagement_score
                .partial_cmp(&a.engagement_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        top_content.truncate(top_limit);

        Self {
            since,
            summary: AnalyticsSummary {
                total_impressions: impressions,
                total_engagements: engagements,
                engagement_rate: engagement_rate_pct(engagements, impressions),
                avg_dwell_ms,
                unique_users: users.len() as u64,
            },
            daily: days
                .into_iter()
                .map(|(date, d)| DailyPoint {
                    date,
                    impressions: d.impressions,
                    engagements: d.engagements,
                    unique_users: d.users.len() as u64,
                })
                .collect(),
            top_content,
        }
    }
}
