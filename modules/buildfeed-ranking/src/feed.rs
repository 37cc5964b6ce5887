//! Feed orchestration: ranked pages first, then the deduplicated
//! chronological feed.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use buildfeed_common::{ContentItem, FeedError, FeedSource, PageToken};

use crate::content::ContentStore;
use crate::fallback::ChronologicalFeed;
use crate::hydrate::{hydrate, with_counts};
use crate::pipeline::{RankOutcome, RankedPage, RankingPipeline};

/// Pagination input. An explicit `page` token wins over the legacy
/// `cursor` / `offset` pair.
#[derive(Debug, Clone, Default)]
pub struct FeedRequest {
    pub cursor: Option<String>,
    pub offset: Option<u64>,
    pub page: Option<PageToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPage {
    pub posts: Vec<ContentItem>,
    pub cursor: Option<String>,
    pub offset: Option<u64>,
    pub has_more: bool,
    pub source: FeedSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page: Option<PageToken>,
}

enum Resume {
    Ranked(Option<String>),
    Chronological(u64),
}

impl FeedRequest {
    fn resume(self) -> Resume {
        match self.page {
            Some(PageToken::Cursor(cursor)) => Resume::Ranked(Some(cursor)),
            Some(PageToken::Offset(offset)) => Resume::Chronological(offset),
            None => {
                let cursor = self.cursor.filter(|c| !c.is_empty());
                match (cursor, self.offset) {
                    (None, Some(offset)) if offset > 0 => Resume::Chronological(offset),
                    (cursor, _) => Resume::Ranked(cursor),
                }
            }
        }
    }
}

pub struct FeedService {
    pipeline: RankingPipeline,
    chronological: ChronologicalFeed,
    content: Arc<dyn ContentStore>,
}

impl FeedService {
    pub fn new(pipeline: RankingPipeline, chronological: ChronologicalFeed, content: Arc<dyn ContentStore>) -> Self {
        Self {
            pipeline,
            chronological,
            content,
        }
    }

    /// Load one feed page. Only a chronological-feed failure is an error;
    /// ranking problems degrade to the chronological feed.
    pub async fn load_feed(&self, user_id: Uuid, request: FeedRequest) -> Result<FeedPage, FeedError> {
        let cursor = match request.resume() {
            Resume::Chronological(offset) => {
                return self
                    .chronological_page(user_id, offset, FeedSource::Chronological, None)
                    .await;
            }
            Resume::Ranked(cursor) => cursor,
        };

        let ranked = self.pipeline.rank(user_id, cursor.as_deref()).await;
        match ranked.outcome {
            RankOutcome::Ranked => match hydrate(self.content.as_ref(), &ranked.ids).await {
                Ok(posts) => Ok(ranked_page(posts, ranked)),
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Hydration failed, falling back");
                    self.chronological_page(user_id, 0, FeedSource::Fallback, None)
                        .await
                }
            },
            RankOutcome::Empty => {
                self.chronological_page(user_id, 0, FeedSource::Chronological, Some(ranked))
                    .await
            }
            RankOutcome::Failed => {
                self.chronological_page(user_id, 0, FeedSource::Fallback, None)
                    .await
            }
        }
    }

    async fn chronological_page(
        &self,
        user_id: Uuid,
        offset: u64,
        source: FeedSource,
        ranked: Option<RankedPage>,
    ) -> Result<FeedPage, FeedError> {
        let page = self.chronological.page(user_id, offset).await?;
        let posts = with_counts(self.content.as_ref(), page.records)
            .await
            .map_err(|e| FeedError::Database(e.to_string()))?;

        let (experiment_id, variant) = ranked
            .map(|r| (r.experiment_id, r.variant))
            .unwrap_or_default();
        Ok(FeedPage {
            posts,
            cursor: None,
            offset: Some(page.next_offset),
            has_more: page.has_more,
            source,
            experiment_id,
            variant,
            next_page: page.has_more.then_some(PageToken::Offset(page.next_offset)),
        })
    }
}

/// A ranked page always has more: either the next ranked page, or the
/// chronological feed from offset 0 once the ranked list runs out. Legacy
/// clients only follow `cursor`, so the last page carries one that points
/// past the end of the ranked list.
fn ranked_page(posts: Vec<ContentItem>, ranked: RankedPage) -> FeedPage {
    let next_page = match &ranked.next_cursor {
        Some(cursor) if ranked.has_more => PageToken::Cursor(cursor.clone()),
        _ => PageToken::Offset(0),
    };
    FeedPage {
        posts,
        cursor: ranked.next_cursor,
        offset: None,
        has_more: true,
        source: FeedSource::Personalized,
        experiment_id: ranked.experiment_id,
        variant: ranked.variant,
        next_page: Some(next_page),
    }
}
