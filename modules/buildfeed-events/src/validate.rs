//! Per-type schema validation for client-emitted events.
//!
//! Clients send loosely shaped JSON. Each event is parsed independently so a
//! single bad event never rejects its batch; invalid events are dropped before
//! they reach the store or the statistics engine.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use buildfeed_common::{EventType, FeedEvent};

/// Longest dwell we accept for a single item (one hour).
pub const MAX_DWELL_MS: f64 = 3_600_000.0;

/// Client clocks may run ahead by this much before we fall back to server time.
const MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventRejection {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("event belongs to another user")]
    ForeignUser,

    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("metadata must be a JSON object")]
    InvalidMetadata,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Event as sent by the client, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub id: Option<Uuid>,
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub author_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub event_type: String,
    pub metadata: Option<serde_json::Value>,
    pub experiment_id: Option<Uuid>,
    pub variant: Option<String>,
    pub position: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
}

impl RawEvent {
    pub fn parse(value: serde_json::Value) -> Result<Self, EventRejection> {
        serde_json::from_value(value).map_err(|e| EventRejection::Malformed(e.to_string()))
    }

    /// Validate against the schema of the event's type.
    pub fn validate(self, now: DateTime<Utc>) -> Result<FeedEvent, EventRejection> {
        let event_type: EventType = self
            .event_type
            .parse()
            .map_err(|_| EventRejection::UnknownType(self.event_type.clone()))?;

        let metadata = match self.metadata {
            None | Some(serde_json::Value::Null) => serde_json::json!({}),
            Some(v @ serde_json::Value::Object(_)) => v,
            Some(_) => return Err(EventRejection::InvalidMetadata),
        };

        check_metadata(event_type, &metadata)?;

        let (experiment_id, variant) = match (self.experiment_id, self.variant) {
            (Some(exp), Some(label)) if !label.trim().is_empty() => (Some(exp), Some(label)),
            (None, None) => (None, None),
            _ => {
                debug!(event_type = %event_type, "Dropping incomplete experiment tag");
                (None, None)
            }
        };

        let created_at = self
            .created_at
            .filter(|t| *t <= now + Duration::seconds(MAX_CLOCK_SKEW_SECS))
            .unwrap_or(now);

        Ok(FeedEvent {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            user_id: self.user_id,
            content_id: self.content_id,
            author_id: self.author_id,
            session_id: self.session_id,
            event_type,
            metadata,
            experiment_id,
            variant,
            position: self.position.filter(|p| *p >= 0),
            created_at,
        })
    }
}

fn check_metadata(event_type: EventType, metadata: &serde_json::Value) -> Result<(), EventRejection> {
    match event_type {
        EventType::Dwell => {
            let ms = metadata
                .get("dwell_ms")
                .and_then(|v| v.as_f64())
                .ok_or(EventRejection::MissingField("dwell_ms"))?;
            if !(0.0..=MAX_DWELL_MS).contains(&ms) {
                return Err(EventRejection::OutOfRange { field: "dwell_ms", value: ms });
            }
        }
        EventType::PollVote => {
            metadata
                .get("option_index")
                .and_then(|v| v.as_u64())
                .ok_or(EventRejection::MissingField("option_index"))?;
        }
        EventType::ScrollPast => {
            if let Some(raw) = metadata.get("viewport_pct") {
                let pct = raw.as_f64().ok_or(EventRejection::MissingField("viewport_pct"))?;
                if !(0.0..=100.0).contains(&pct) {
                    return Err(EventRejection::OutOfRange { field: "viewport_pct", value: pct });
                }
            }
        }
        _ => {}
    }
    Ok(())
}
