use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

/// Cache keys. Every parameter that changes a result is part of its key.
pub mod keys {
    use uuid::Uuid;

    pub const RANKED_FEED_PREFIX: &str = "feed:";
    pub const TRENDING_PREFIX: &str = "trending:";
    pub const ANALYTICS_PREFIX: &str = "analytics:";

    pub fn ranked_feed(user_id: Uuid) -> String {
        format!("feed:ranked:{user_id}")
    }

    pub fn trending_posts(hours: u32, limit: usize) -> String {
        format!("trending:posts:{hours}:{limit}")
    }

    pub fn trending_builders(hours: u32, limit: usize) -> String {
        format!("trending:builders:{hours}:{limit}")
    }

    pub fn analytics(days: u32) -> String {
        format!("analytics:{days}")
    }
}

struct CacheEntry {
    value: serde_json::Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

type Snapshot = HashMap<String, Arc<CacheEntry>>;

/// Process-local TTL cache for ranked lists and aggregate payloads.
///
/// Readers load an immutable snapshot and never wait on writers. Writers
/// publish a modified copy; concurrent writes to the same key are
/// last-write-wins. Not shared across instances.
pub struct FeedCache {
    entries: ArcSwap<Snapshot>,
    max_entries: usize,
}

impl FeedCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Live value for `key`. Expired entries read as misses and are dropped.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let snapshot = self.entries.load();
        let entry = snapshot.get(key)?;
        if entry.is_expired(Instant::now()) {
            drop(snapshot);
            self.remove_expired(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let entry = Arc::new(CacheEntry {
            value,
            inserted_at: Instant::now(),
            ttl,
        });
        let max_entries = self.max_entries;
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(key.to_string(), entry.clone());
            if next.len() > max_entries {
                evict(&mut next, max_entries);
            }
            next
        });
    }

    /// Deserialize the live value for `key`. A value that no longer matches
    /// `T` is an error, not a miss.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.get(key).map(serde_json::from_value).transpose()
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), serde_json::Error> {
        self.set(key, serde_json::to_value(value)?, ttl);
        Ok(())
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn clear_by_prefix(&self, prefix: &str) -> usize {
        let before = self.len();
        self.entries.rcu(|current| {
            current
                .iter()
                .filter(|(k, _)| !k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Snapshot>()
        });
        let removed = before.saturating_sub(self.len());
        debug!(prefix, removed, "Cleared cache prefix");
        removed
    }

    pub fn clear(&self) {
        self.entries.store(Arc::new(HashMap::new()));
    }

    /// Drop all expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.len();
        self.entries.rcu(|current| {
            current
                .iter()
                .filter(|(_, e)| !e.is_expired(now))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Snapshot>()
        });
        before.saturating_sub(self.len())
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            if next.get(key).is_some_and(|e| e.is_expired(now)) {
                next.remove(key);
            }
            next
        });
    }
}

/// Shrink to `max_entries`: expired entries go first, then the oldest.
fn evict(entries: &mut Snapshot, max_entries: usize) {
    let now = Instant::now();
    entries.retain(|_, e| !e.is_expired(now));
    if entries.len() <= max_entries {
        return;
    }
    let mut by_age: Vec<(Instant, String)> = entries
        .iter()
        .map(|(k, e)| (e.inserted_at, k.clone()))
        .collect();
    by_age.sort();
    let excess = entries.len() - max_entries;
    for (_, key) in by_age.into_iter().take(excess) {
        entries.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn set_then_get() {
        let cache = FeedCache::new(10);
        cache.set("a", json!([1, 2, 3]), MINUTE);
        assert_eq!(cache.get("a"), Some(json!([1, 2, 3])));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn expired_entries_read_as_misses() {
        let cache = FeedCache::new(10);
        cache.set("gone", json!(1), Duration::ZERO);
        assert_eq!(cache.get("gone"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = FeedCache::new(10);
        cache.set("stale", json!(1), Duration::ZERO);
        cache.set("fresh", json!(2), MINUTE);
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
    }

    #[test]
    fn prefix_clear_leaves_other_namespaces() {
        let cache = FeedCache::new(10);
        cache.set(&keys::trending_posts(24, 10), json!([]), MINUTE);
        cache.set(&keys::trending_builders(24, 10), json!([]), MINUTE);
        cache.set(&keys::analytics(30), json!({}), MINUTE);

        assert_eq!(cache.clear_by_prefix(keys::TRENDING_PREFIX), 2);
        assert!(cache.get(&keys::analytics(30)).is_some());
    }

    #[test]
    fn cap_evicts_oldest() {
        let cache = FeedCache::new(2);
        cache.set("first", json!(1), MINUTE);
        cache.set("second", json!(2), MINUTE);
        cache.set("third", json!(3), MINUTE);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("first"), None);
        assert_eq!(cache.get("third"), Some(json!(3)));
    }

    #[test]
    fn keys_distinguish_parameters() {
        let user = Uuid::new_v4();
        assert_ne!(keys::trending_posts(24, 10), keys::trending_posts(24, 20));
        assert_ne!(keys::trending_posts(24, 10), keys::trending_posts(48, 10));
        assert_ne!(keys::trending_posts(24, 10), keys::trending_builders(24, 10));
        assert_ne!(keys::analytics(7), keys::analytics(30));
        assert_ne!(keys::ranked_feed(user), keys::ranked_feed(Uuid::new_v4()));
        assert!(keys::ranked_feed(user).starts_with(keys::RANKED_FEED_PREFIX));
    }

    #[test]
    fn typed_helpers_round_trip_and_report_mismatch() {
        let cache = FeedCache::new(10);
        cache.set_json("ids", &vec![1u32, 2], MINUTE).unwrap();
        assert_eq!(cache.get_json::<Vec<u32>>("ids").unwrap(), Some(vec![1, 2]));
        assert!(cache.get_json::<String>("ids").is_err());
        assert_eq!(cache.get_json::<String>("missing").unwrap(), None);
    }
}
