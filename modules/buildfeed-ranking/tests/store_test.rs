//! Integration tests for PgContentStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use buildfeed_ranking::{ContentStore, PgContentStore};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Get a test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    sqlx::migrate!("../../migrations").run(&pool).await.ok()?;

    sqlx::query("TRUNCATE posts, post_likes, seen_posts, user_interactions CASCADE")
        .execute(&pool)
        .await
        .ok()?;

    Some(pool)
}

async fn insert_post(
    pool: &PgPool,
    author: Uuid,
    parent: Option<Uuid>,
    created_at: DateTime<Utc>,
    media: &[&str],
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO posts (id, author_id, body, media_urls, parent_id, created_at) VALUES ($1, $2, '', $3, $4, $5)",
    )
    .bind(id)
    .bind(author)
    .bind(media.iter().map(|m| m.to_string()).collect::<Vec<_>>())
    .bind(parent)
    .bind(created_at)
    .execute(pool)
    .await
    .unwrap();
    id
}

// A single test: the queries all scan the shared posts table.
#[tokio::test]
async fn content_queries_respect_visibility_rules() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgContentStore::new(pool.clone());
    let now = Utc::now();
    let (viewer, author, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let fresh = insert_post(&pool, author, None, now - Duration::hours(1), &["a.png", "b.png"]).await;
    let older = insert_post(&pool, other, None, now - Duration::hours(10), &[]).await;
    let stale = insert_post(&pool, author, None, now - Duration::days(10), &[]).await;
    let own = insert_post(&pool, viewer, None, now - Duration::hours(2), &[]).await;
    let reply = insert_post(&pool, other, Some(fresh), now, &[]).await;
    let deleted = insert_post(&pool, author, None, now - Duration::hours(3), &[]).await;
    sqlx::query("UPDATE posts SET is_deleted = TRUE WHERE id = $1")
        .bind(deleted)
        .execute(&pool)
        .await
        .unwrap();

    // Candidates: window, top-level, not deleted, not the viewer's own.
    let candidates = store
        .recent_candidates(now - Duration::hours(72), Some(viewer), 50)
        .await
        .unwrap();
    let ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![fresh, older]);
    assert_eq!(candidates[0].media_count(), 2);

    // Chronological: all time, newest first, minus exclusions.
    let page = store.chronological(&[older], 0, 10).await.unwrap();
    let ids: Vec<Uuid> = page.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![fresh, own, stale]);
    let second = store.chronological(&[], 2, 10).await.unwrap();
    assert_eq!(second.iter().map(|c| c.id).collect::<Vec<_>>(), vec![older, stale]);

    // Counters.
    for liker in [viewer, other] {
        sqlx::query("INSERT INTO post_likes (post_id, user_id) VALUES ($1, $2)")
            .bind(fresh)
            .bind(liker)
            .execute(&pool)
            .await
            .unwrap();
    }
    let likes = store.like_counts(&[fresh, older]).await.unwrap();
    assert_eq!(likes.get(&fresh), Some(&2));
    assert_eq!(likes.get(&older), None);
    let replies = store.reply_counts(&[fresh, older]).await.unwrap();
    assert_eq!(replies.get(&fresh), Some(&1));

    let fetched = store.fetch_by_ids(&[fresh, deleted, reply]).await.unwrap();
    assert_eq!(fetched.len(), 2);
    assert!(fetched.iter().all(|r| r.id != deleted));

    // Seen markers and affinity.
    sqlx::query("INSERT INTO seen_posts (user_id, content_id) VALUES ($1, $2)")
        .bind(viewer)
        .bind(older)
        .execute(&pool)
        .await
        .unwrap();
    let seen = store.seen_ids(viewer, &[fresh, older]).await.unwrap();
    assert!(seen.contains(&older) && !seen.contains(&fresh));

    sqlx::query(
        "INSERT INTO user_interactions (user_id, target_user_id, weight, interaction_count) VALUES ($1, $2, 7.5, 3)",
    )
    .bind(viewer)
    .bind(author)
    .execute(&pool)
    .await
    .unwrap();
    let affinity = store.author_affinity(viewer, &[author, other]).await.unwrap();
    assert_eq!(affinity.get(&author), Some(&7.5));
    assert!(!affinity.contains_key(&other));

    assert!(store.like_counts(&[]).await.unwrap().is_empty());
}
