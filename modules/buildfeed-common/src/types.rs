use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// --- Content ---

/// A content row as stored. Engagement counters are not part of the row; they
/// are aggregated per request window.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRecord {
    pub id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub media_urls: Vec<String>,
    pub parent_id: Option<Uuid>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl ContentRecord {
    pub fn media_count(&self) -> u32 {
        self.media_urls.len() as u32
    }

    /// Top-level, visible content. Replies and soft-deleted items never appear
    /// in feeds.
    pub fn is_feed_eligible(&self) -> bool {
        !self.is_deleted && self.parent_id.is_none()
    }
}

/// A content item hydrated with its engagement counters, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub media_urls: Vec<String>,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub likes: u64,
    pub replies: u64,
    pub media_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl ContentItem {
    pub fn hydrate(record: ContentRecord, likes: u64, replies: u64) -> Self {
        let media_count = record.media_count();
        Self {
            id: record.id,
            author_id: record.author_id,
            body: record.body,
            media_urls: record.media_urls,
            parent_id: record.parent_id,
            created_at: record.created_at,
            likes,
            replies,
            media_count,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

// --- Behavioral events ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Impression,
    Click,
    Like,
    Unlike,
    Reply,
    Share,
    Bookmark,
    Dwell,
    ScrollPast,
    PollVote,
    ProfileClick,
    ExpandContent,
}

impl EventType {
    pub const ALL: [EventType; 12] = [
        EventType::Impression,
        EventType::Click,
        EventType::Like,
        EventType::Unlike,
        EventType::Reply,
        EventType::Share,
        EventType::Bookmark,
        EventType::Dwell,
        EventType::ScrollPast,
        EventType::PollVote,
        EventType::ProfileClick,
        EventType::ExpandContent,
    ];

    /// Event types counted as an engagement in rates and analytics.
    pub const ENGAGEMENT: [EventType; 5] = [
        EventType::Like,
        EventType::Reply,
        EventType::Share,
        EventType::Bookmark,
        EventType::PollVote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Impression => "impression",
            EventType::Click => "click",
            EventType::Like => "like",
            EventType::Unlike => "unlike",
            EventType::Reply => "reply",
            EventType::Share => "share",
            EventType::Bookmark => "bookmark",
            EventType::Dwell => "dwell",
            EventType::ScrollPast => "scroll_past",
            EventType::PollVote => "poll_vote",
            EventType::ProfileClick => "profile_click",
            EventType::ExpandContent => "expand_content",
        }
    }

    pub fn is_engagement(&self) -> bool {
        Self::ENGAGEMENT.contains(self)
    }

    /// Weight added to the actor→author interaction edge, or `None` for event
    /// types that do not update the interaction graph.
    pub fn interaction_weight(&self) -> Option<f64> {
        match self {
            EventType::Like => Some(1.0),
            EventType::Reply => Some(3.0),
            EventType::Share => Some(4.0),
            EventType::Bookmark => Some(2.0),
            EventType::Click => Some(0.5),
            EventType::ProfileClick => Some(1.5),
            _ => None,
        }
    }

    pub fn is_significant(&self) -> bool {
        self.interaction_weight().is_some()
    }

    pub fn engagement_labels() -> Vec<String> {
        Self::ENGAGEMENT.iter().map(|t| t.as_str().to_string()).collect()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// An append-only behavioral event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub author_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub event_type: EventType,
    pub metadata: serde_json::Value,
    pub experiment_id: Option<Uuid>,
    pub variant: Option<String>,
    pub position: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl FeedEvent {
    pub fn new(user_id: Uuid, content_id: Uuid, event_type: EventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            content_id,
            author_id: None,
            session_id: None,
            event_type,
            metadata: serde_json::json!({}),
            experiment_id: None,
            variant: None,
            position: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_author(mut self, author_id: Uuid) -> Self {
        self.author_id = Some(author_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_experiment(mut self, experiment_id: Uuid, variant: impl Into<String>) -> Self {
        self.experiment_id = Some(experiment_id);
        self.variant = Some(variant.into());
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Dwell milliseconds for `dwell` events.
    pub fn dwell_ms(&self) -> Option<f64> {
        if self.event_type != EventType::Dwell {
            return None;
        }
        self.metadata.get("dwell_ms").and_then(|v| v.as_f64())
    }
}

// --- Sessions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    Unknown,
}

impl DeviceType {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "mobile" | "phone" => DeviceType::Mobile,
            "tablet" => DeviceType::Tablet,
            "desktop" => DeviceType::Desktop,
            _ => DeviceType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
            DeviceType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Start,
    Heartbeat,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_type: DeviceType,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_active_at: DateTime<Utc>,
    pub event_count: i32,
    pub feed_depth: i32,
}

// --- Experiments ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Completed,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Completed => "completed",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "running" => ExperimentStatus::Running,
            "completed" => ExperimentStatus::Completed,
            _ => ExperimentStatus::Draft,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub name: String,
    /// Relative traffic share.
    pub weight: u32,
    pub is_control: bool,
    pub position: i32,
    /// Ranking parameter overrides applied to users in this arm.
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ExperimentStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub variants: Vec<Variant>,
}

impl Experiment {
    /// The baseline arm: the variant flagged as control, else the first by position.
    pub fn control(&self) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|v| v.is_control)
            .or_else(|| self.variants.iter().min_by_key(|v| v.position))
    }

    pub fn variant(&self, id: Uuid) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }
}

/// A user's stable arm in an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub experiment_id: Uuid,
    pub user_id: Uuid,
    pub variant_id: Uuid,
    pub variant: String,
    #[serde(skip)]
    pub config: serde_json::Value,
}

// --- Feed pagination ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    Personalized,
    Chronological,
    Fallback,
}

/// Explicit pagination token: ranked pages resume from an opaque cursor,
/// chronological pages from a numeric offset.
///
/// Rendered as `cursor:<opaque>` or `offset:<n>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    Cursor(String),
    Offset(u64),
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageToken::Cursor(c) => write!(f, "cursor:{c}"),
            PageToken::Offset(o) => write!(f, "offset:{o}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid page token: {0}")]
pub struct InvalidPageToken(pub String);

impl FromStr for PageToken {
    type Err = InvalidPageToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("cursor", c)) if !c.is_empty() => Ok(PageToken::Cursor(c.to_string())),
            Some(("offset", o)) => o
                .parse()
                .map(PageToken::Offset)
                .map_err(|_| InvalidPageToken(s.to_string())),
            _ => Err(InvalidPageToken(s.to_string())),
        }
    }
}

impl Serialize for PageToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PageToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
