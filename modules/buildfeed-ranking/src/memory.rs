//! In-memory ContentStore for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use buildfeed_common::ContentRecord;

use crate::content::ContentStore;

#[derive(Default)]
struct State {
    posts: Vec<ContentRecord>,
    likes: HashMap<Uuid, u64>,
    seen: HashSet<(Uuid, Uuid)>,
    affinity: HashMap<(Uuid, Uuid), f64>,
}

#[derive(Default)]
pub struct MemoryContentStore {
    state: Mutex<State>,
    fail: AtomicBool,
    delay_ms: AtomicU64,
    candidate_fetches: AtomicUsize,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level post by `author` created `age` ago. Returns its id.
    pub fn add_post(&self, author_id: Uuid, age: chrono::Duration) -> Uuid {
        self.insert(ContentRecord {
            id: Uuid::new_v4(),
            author_id,
            body: String::new(),
            media_urls: Vec::new(),
            parent_id: None,
            is_deleted: false,
            created_at: Utc::now() - age,
        })
    }

    pub fn insert(&self, record: ContentRecord) -> Uuid {
        let id = record.id;
        self.state.lock().unwrap().posts.push(record);
        id
    }

    pub fn add_reply(&self, parent_id: Uuid, author_id: Uuid) -> Uuid {
        self.insert(ContentRecord {
            id: Uuid::new_v4(),
            author_id,
            body: String::new(),
            media_urls: Vec::new(),
            parent_id: Some(parent_id),
            is_deleted: false,
            created_at: Utc::now(),
        })
    }

    pub fn set_likes(&self, post_id: Uuid, likes: u64) {
        self.state.lock().unwrap().likes.insert(post_id, likes);
    }

    pub fn soft_delete(&self, post_id: Uuid) {
        let mut state = self.state.lock().unwrap();
        if let Some(post) = state.posts.iter_mut().find(|p| p.id == post_id) {
            post.is_deleted = true;
        }
    }

    pub fn mark_seen(&self, user_id: Uuid, post_id: Uuid) {
        self.state.lock().unwrap().seen.insert((user_id, post_id));
    }

    pub fn set_affinity(&self, user_id: Uuid, author_id: Uuid, weight: f64) {
        self.state
            .lock()
            .unwrap()
            .affinity
            .insert((user_id, author_id), weight);
    }

    /// Make every call fail.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Delay every call, to exercise timeouts.
    pub fn delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// How many times candidates were fetched (one per ranking computation).
    pub fn candidate_fetches(&self) -> usize {
        self.candidate_fetches.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("content store unavailable");
        }
        Ok(())
    }

    fn newest_first(mut posts: Vec<ContentRecord>) -> Vec<ContentRecord> {
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        posts
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn recent_candidates(
        &self,
        since: DateTime<Utc>,
        exclude_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ContentRecord>> {
        self.enter().await?;
        self.candidate_fetches.fetch_add(1, Ordering::SeqCst);
        let posts: Vec<ContentRecord> = self
            .state
            .lock()
            .unwrap()
            .posts
            .iter()
            .filter(|p| p.is_feed_eligible() && p.created_at >= since)
            .filter(|p| Some(p.author_id) != exclude_author)
            .cloned()
            .collect();
        Ok(Self::newest_first(posts).into_iter().take(limit).collect())
    }

    async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ContentRecord>> {
        self.enter().await?;
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        Ok(self
            .state
            .lock()
            .unwrap()
            .posts
            .iter()
            .filter(|p| !p.is_deleted && wanted.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn like_counts(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, u64>> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| state.likes.get(id).map(|n| (*id, *n)))
            .collect())
    }

    async fn reply_counts(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, u64>> {
        self.enter().await?;
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        let mut counts = HashMap::new();
        for post in self.state.lock().unwrap().posts.iter().filter(|p| !p.is_deleted) {
            if let Some(parent) = post.parent_id.filter(|p| wanted.contains(p)) {
                *counts.entry(parent).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn chronological(&self, exclude: &[Uuid], offset: u64, limit: usize) -> Result<Vec<ContentRecord>> {
        self.enter().await?;
        let excluded: HashSet<&Uuid> = exclude.iter().collect();
        let posts: Vec<ContentRecord> = self
            .state
            .lock()
            .unwrap()
            .posts
            .iter()
            .filter(|p| p.is_feed_eligible() && !excluded.contains(&p.id))
            .cloned()
            .collect();
        Ok(Self::newest_first(posts)
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .collect())
    }

    async fn seen_ids(&self, user_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| state.seen.contains(&(user_id, **id)))
            .copied()
            .collect())
    }

    async fn author_affinity(&self, user_id: Uuid, authors: &[Uuid]) -> Result<HashMap<Uuid, f64>> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        Ok(authors
            .iter()
            .filter_map(|a| state.affinity.get(&(user_id, *a)).map(|w| (*a, *w)))
            .collect())
    }
}
