//! Chronological feed used when personalization yields nothing, and as the
//! continuation once the ranked list is exhausted.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use buildfeed_common::{ContentRecord, FeedError};

use crate::cache::{keys, FeedCache};
use crate::content::ContentStore;
use crate::pipeline::RankedEntry;

#[derive(Debug, Clone, PartialEq)]
pub struct ChronologicalPage {
    pub records: Vec<ContentRecord>,
    pub next_offset: u64,
    /// True iff the page came back full. A full final page reports `true`
    /// and the next request returns an empty page.
    pub has_more: bool,
}

pub struct ChronologicalFeed {
    content: Arc<dyn ContentStore>,
    cache: Arc<FeedCache>,
    page_size: usize,
}

impl ChronologicalFeed {
    pub fn new(content: Arc<dyn ContentStore>, cache: Arc<FeedCache>, page_size: usize) -> Self {
        Self {
            content,
            cache,
            page_size: page_size.max(1),
        }
    }

    /// Newest-first page at `offset`, skipping everything the user was just
    /// shown in their ranked feed.
    pub async fn page(&self, user_id: Uuid, offset: u64) -> Result<ChronologicalPage, FeedError> {
        let exclude = self.ranked_ids(user_id);
        let records = self
            .content
            .chronological(&exclude, offset, self.page_size)
            .await
            .map_err(|e| FeedError::Database(e.to_string()))?;

        Ok(ChronologicalPage {
            next_offset: offset + records.len() as u64,
            has_more: records.len() == self.page_size,
            records,
        })
    }

    fn ranked_ids(&self, user_id: Uuid) -> Vec<Uuid> {
        match self.cache.get_json::<RankedEntry>(&keys::ranked_feed(user_id)) {
            Ok(Some(entry)) => entry.ids,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Unreadable ranked entry, not deduplicating");
                Vec::new()
            }
        }
    }
}
