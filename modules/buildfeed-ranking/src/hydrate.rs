use std::collections::HashMap;

use anyhow::Result;
use uuid::Uuid;

use buildfeed_common::{ContentItem, ContentRecord};

use crate::content::ContentStore;

/// Turn ranked ids into content items, preserving the ranked order.
///
/// Ids whose record is gone (soft-deleted since ranking) are dropped.
pub async fn hydrate(content: &dyn ContentStore, ids: &[Uuid]) -> Result<Vec<ContentItem>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let (records, likes, replies) = tokio::try_join!(
        content.fetch_by_ids(ids),
        content.like_counts(ids),
        content.reply_counts(ids),
    )?;

    let mut by_id: HashMap<Uuid, ContentRecord> = records
        .into_iter()
        .filter(|r| !r.is_deleted)
        .map(|r| (r.id, r))
        .collect();

    Ok(ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(|record| {
            let id = record.id;
            ContentItem::hydrate(
                record,
                likes.get(&id).copied().unwrap_or(0),
                replies.get(&id).copied().unwrap_or(0),
            )
        })
        .collect())
}

/// Attach engagement counters to records already in display order.
pub async fn with_counts(content: &dyn ContentStore, records: Vec<ContentRecord>) -> Result<Vec<ContentItem>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
    let (likes, replies) = tokio::try_join!(content.like_counts(&ids), content.reply_counts(&ids))?;

    Ok(records
        .into_iter()
        .map(|record| {
            let id = record.id;
            ContentItem::hydrate(
                record,
                likes.get(&id).copied().unwrap_or(0),
                replies.get(&id).copied().unwrap_or(0),
            )
        })
        .collect())
}
