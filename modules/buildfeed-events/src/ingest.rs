//! Ingestion of session lifecycle messages and event batches.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use buildfeed_common::{DeviceType, EventType, FeedEvent, Session, SessionAction};

use crate::store::{EventStore, SessionUpdate};
use crate::tasks::BestEffort;
use crate::validate::{EventRejection, RawEvent};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid body: {0}")]
    InvalidBody(String),

    #[error("session belongs to another user")]
    Forbidden,

    #[error("batch of {size} events exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Session lifecycle message sent on start, heartbeat, and end of visibility.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionControl {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: SessionAction,
    pub device_type: Option<String>,
    pub event_count: Option<i32>,
    pub feed_depth: Option<i32>,
}

/// The two body shapes accepted by the events endpoint.
#[derive(Debug, Clone)]
pub enum IngestRequest {
    Session(SessionControl),
    Batch(Vec<serde_json::Value>),
}

impl IngestRequest {
    pub fn from_json(body: serde_json::Value) -> Result<Self, IngestError> {
        let serde_json::Value::Object(mut body) = body else {
            return Err(IngestError::InvalidBody("expected a JSON object".into()));
        };

        if let Some(session) = body.remove("session") {
            let control = serde_json::from_value(session)
                .map_err(|e| IngestError::InvalidBody(format!("session: {e}")))?;
            return Ok(Self::Session(control));
        }

        match body.remove("events") {
            Some(serde_json::Value::Array(events)) => Ok(Self::Batch(events)),
            Some(_) => Err(IngestError::InvalidBody("events must be an array".into())),
            None => Err(IngestError::InvalidBody(
                "expected a `session` or `events` field".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOutcome {
    /// Events newly written to the store.
    pub inserted: u64,
    /// Events that passed authorization and validation.
    pub accepted: usize,
    /// Events dropped for belonging to another user or failing validation.
    pub dropped: usize,
    pub used_fallback: bool,
}

pub struct Ingestor {
    store: Arc<dyn EventStore>,
    tasks: Arc<BestEffort>,
    max_batch: usize,
}

impl Ingestor {
    pub fn new(store: Arc<dyn EventStore>, tasks: Arc<BestEffort>, max_batch: usize) -> Self {
        Self {
            store,
            tasks,
            max_batch,
        }
    }

    pub fn tasks(&self) -> &Arc<BestEffort> {
        &self.tasks
    }

    /// Apply a session lifecycle message. Updates for sessions that do not
    /// exist (yet) are ignored: retries can race session creation.
    pub async fn apply_session(&self, caller: Uuid, control: SessionControl) -> Result<(), IngestError> {
        if control.user_id != caller {
            return Err(IngestError::Forbidden);
        }

        let now = Utc::now();
        match control.action {
            SessionAction::Start => {
                let session = Session {
                    id: control.id,
                    user_id: control.user_id,
                    device_type: control
                        .device_type
                        .as_deref()
                        .map(DeviceType::from_label)
                        .unwrap_or(DeviceType::Unknown),
                    started_at: now,
                    ended_at: None,
                    last_active_at: now,
                    event_count: control.event_count.unwrap_or(0),
                    feed_depth: control.feed_depth.unwrap_or(0),
                };
                self.store.start_session(&session).await?;
            }
            SessionAction::Heartbeat | SessionAction::End => {
                let update = SessionUpdate {
                    id: control.id,
                    user_id: control.user_id,
                    at: now,
                    ended: control.action == SessionAction::End,
                    event_count: control.event_count,
                    feed_depth: control.feed_depth,
                };
                if !self.store.touch_session(&update).await? {
                    debug!(session_id = %control.id, action = ?control.action, "Ignoring update for unknown session");
                }
            }
        }
        Ok(())
    }

    /// Authorize, validate and store a batch of raw events.
    ///
    /// Events attributed to anyone but the caller are dropped, not rejected:
    /// the rest of the batch is still accepted.
    pub async fn ingest_batch(
        &self,
        caller: Uuid,
        raw: Vec<serde_json::Value>,
    ) -> Result<IngestOutcome, IngestError> {
        if raw.len() > self.max_batch {
            return Err(IngestError::BatchTooLarge {
                size: raw.len(),
                max: self.max_batch,
            });
        }

        let now = Utc::now();
        let total = raw.len();
        let mut accepted = Vec::with_capacity(total);
        let mut foreign = 0usize;

        for value in raw {
            let checked = RawEvent::parse(value).and_then(|event| {
                if event.user_id != caller {
                    return Err(EventRejection::ForeignUser);
                }
                event.validate(now)
            });
            match checked {
                Ok(event) => accepted.push(event),
                Err(EventRejection::ForeignUser) => foreign += 1,
                Err(reason) => debug!(%reason, "Dropping invalid event"),
            }
        }

        if foreign > 0 {
            warn!(caller = %caller, foreign, "Dropped events attributed to another user");
        }

        let mut outcome = IngestOutcome {
            inserted: 0,
            accepted: accepted.len(),
            dropped: total - accepted.len(),
            used_fallback: false,
        };
        if accepted.is_empty() {
            return Ok(outcome);
        }

        let inserted = match self.store.insert_batch(&accepted).await {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!(error = %e, events = accepted.len(), "Batch insert failed, inserting individually");
                outcome.used_fallback = true;
                self.insert_individually(&accepted).await?
            }
        };
        outcome.inserted = inserted.len() as u64;

        // Retried events already counted toward the graph on first delivery.
        let fresh: HashSet<Uuid> = inserted.into_iter().collect();
        let stored: Vec<FeedEvent> = accepted
            .into_iter()
            .filter(|e| fresh.contains(&e.id))
            .collect();
        self.dispatch_interactions(&stored);

        info!(
            caller = %caller,
            inserted = outcome.inserted,
            dropped = outcome.dropped,
            fallback = outcome.used_fallback,
            "Ingested event batch"
        );
        Ok(outcome)
    }

    async fn insert_individually(&self, events: &[FeedEvent]) -> Result<Vec<Uuid>, IngestError> {
        let results = join_all(events.iter().map(|e| self.store.insert_event(e))).await;

        let mut inserted = Vec::new();
        let mut last_error = None;
        for (event, result) in events.iter().zip(results) {
            match result {
                Ok(true) => inserted.push(event.id),
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Single event insert failed");
                    last_error = Some(e);
                }
            }
        }

        // Seen markers are idempotent; a conflict is a no-op, a failure is only logged.
        let mut pairs = HashSet::new();
        let markers = join_all(
            events
                .iter()
                .filter(|e| e.event_type == EventType::Impression)
                .filter(|e| pairs.insert((e.user_id, e.content_id)))
                .map(|e| self.store.mark_seen(e.user_id, e.content_id, e.created_at)),
        )
        .await;
        for result in markers {
            if let Err(e) = result {
                warn!(error = %e, "Failed to mark post seen");
            }
        }

        match last_error {
            Some(e) if inserted.is_empty() => Err(IngestError::Store(e)),
            _ => Ok(inserted),
        }
    }

    /// Fire one interaction-graph update per significant event.
    fn dispatch_interactions(&self, events: &[FeedEvent]) {
        let jobs: Vec<_> = events
            .iter()
            .filter_map(|e| {
                let weight = e.event_type.interaction_weight()?;
                let author = e.author_id.filter(|a| *a != e.user_id)?;
                let store = self.store.clone();
                let (user, at) = (e.user_id, e.created_at);
                Some(async move { store.record_interaction(user, author, weight, at).await })
            })
            .collect();

        self.tasks.dispatch_all("interaction_graph", jobs);
    }
}
