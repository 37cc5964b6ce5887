//! In-memory EventStore for tests. No database required. Thread-safe.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use buildfeed_common::{EventType, FeedEvent, Session};

use crate::analytics::AnalyticsReport;
use crate::store::{EventStore, SessionUpdate};

#[derive(Default)]
struct State {
    events: Vec<FeedEvent>,
    event_ids: HashSet<Uuid>,
    seen: HashSet<(Uuid, Uuid)>,
    sessions: HashMap<Uuid, Session>,
    interactions: HashMap<(Uuid, Uuid), (f64, u32)>,
}

#[derive(Default)]
pub struct MemoryEventStore {
    state: Mutex<State>,
    fail_batches: AtomicBool,
    fail_interactions: AtomicBool,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `insert_batch` fail, forcing the per-event fallback path.
    pub fn fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_interactions(&self, fail: bool) {
        self.fail_interactions.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<FeedEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn seen_markers(&self) -> usize {
        self.state.lock().unwrap().seen.len()
    }

    pub fn has_seen(&self, user_id: Uuid, content_id: Uuid) -> bool {
        self.state.lock().unwrap().seen.contains(&(user_id, content_id))
    }

    pub fn session(&self, id: Uuid) -> Option<Session> {
        self.state.lock().unwrap().sessions.get(&id).cloned()
    }

    /// Accumulated (weight, count) for a user→author edge.
    pub fn interaction(&self, user_id: Uuid, target_user_id: Uuid) -> Option<(f64, u32)> {
        self.state
            .lock()
            .unwrap()
            .interactions
            .get(&(user_id, target_user_id))
            .copied()
    }

    fn push_event(state: &mut State, event: &FeedEvent) -> bool {
        if !state.event_ids.insert(event.id) {
            return false;
        }
        state.events.push(event.clone());
        true
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert_batch(&self, events: &[FeedEvent]) -> Result<Vec<Uuid>> {
        if self.fail_batches.load(Ordering::SeqCst) {
            bail!("batch insert unavailable");
        }
        let mut state = self.state.lock().unwrap();
        let mut inserted = Vec::new();
        for event in events {
            if Self::push_event(&mut state, event) {
                inserted.push(event.id);
            }
            if event.event_type == EventType::Impression {
                state.seen.insert((event.user_id, event.content_id));
            }
        }
        Ok(inserted)
    }

    async fn insert_event(&self, event: &FeedEvent) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        Ok(Self::push_event(&mut state, event))
    }

    async fn mark_seen(&self, user_id: Uuid, content_id: Uuid, _at: DateTime<Utc>) -> Result<bool> {
        Ok(self.state.lock().unwrap().seen.insert((user_id, content_id)))
    }

    async fn record_interaction(
        &self,
        user_id: Uuid,
        target_user_id: Uuid,
        weight: f64,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        if self.fail_interactions.load(Ordering::SeqCst) {
            bail!("interaction graph unavailable");
        }
        let mut state = self.state.lock().unwrap();
        let edge = state
            .interactions
            .entry((user_id, target_user_id))
            .or_insert((0.0, 0));
        edge.0 += weight;
        edge.1 += 1;
        Ok(())
    }

    async fn start_session(&self, session: &Session) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.sessions.entry(session.id) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.user_id == session.user_id {
                    existing.device_type = session.device_type;
                    existing.last_active_at = session.last_active_at;
                    existing.ended_at = None;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
            }
        }
        Ok(())
    }

    async fn touch_session(&self, update: &SessionUpdate) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(session) = state
            .sessions
            .get_mut(&update.id)
            .filter(|s| s.user_id == update.user_id)
        else {
            return Ok(false);
        };
        session.last_active_at = update.at;
        if update.ended {
            session.ended_at = Some(update.at);
        }
        if let Some(count) = update.event_count {
            session.event_count = count;
        }
        if let Some(depth) = update.feed_depth {
            session.feed_depth = session.feed_depth.max(depth);
        }
        Ok(true)
    }

    async fn analytics(&self, since: DateTime<Utc>, top_limit: usize) -> Result<AnalyticsReport> {
        let events = self.events();
        Ok(AnalyticsReport::from_events(&events, since, top_limit))
    }
}
