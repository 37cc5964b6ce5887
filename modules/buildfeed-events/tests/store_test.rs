//! Integration tests for PgEventStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use buildfeed_common::{DeviceType, EventType, FeedEvent, Session};
use buildfeed_events::{EventStore, PgEventStore, SessionUpdate};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

/// Get a test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    sqlx::migrate!("../../migrations").run(&pool).await.ok()?;

    // Clean slate for each test
    sqlx::query("TRUNCATE feed_events, seen_posts, user_interactions, feed_sessions")
        .execute(&pool)
        .await
        .ok()?;

    Some(pool)
}

#[tokio::test]
async fn batch_insert_is_idempotent_on_event_id() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgEventStore::new(pool);
    let user = Uuid::new_v4();
    let post = Uuid::new_v4();
    let batch = vec![
        FeedEvent::new(user, post, EventType::Impression),
        FeedEvent::new(user, post, EventType::Impression),
        FeedEvent::new(user, post, EventType::Like),
    ];

    let first = store.insert_batch(&batch).await.unwrap();
    assert_eq!(first.len(), 3);
    assert!(batch.iter().all(|e| first.contains(&e.id)));
    assert!(store.insert_batch(&batch).await.unwrap().is_empty());
    assert!(!store.insert_event(&batch[2]).await.unwrap());

    // The batch already wrote the seen marker.
    assert!(!store.mark_seen(user, post, Utc::now()).await.unwrap());
}

#[tokio::test]
async fn mark_seen_ignores_conflicts() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgEventStore::new(pool);
    let user = Uuid::new_v4();
    let post = Uuid::new_v4();

    assert!(store.mark_seen(user, post, Utc::now()).await.unwrap());
    assert!(!store.mark_seen(user, post, Utc::now()).await.unwrap());
}

#[tokio::test]
async fn interactions_accumulate_weight() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgEventStore::new(pool.clone());
    let user = Uuid::new_v4();
    let author = Uuid::new_v4();

    store.record_interaction(user, author, 1.0, Utc::now()).await.unwrap();
    store.record_interaction(user, author, 3.0, Utc::now()).await.unwrap();

    let (weight, count): (f64, i32) = sqlx::query_as(
        "SELECT weight, interaction_count FROM user_interactions WHERE user_id = $1 AND target_user_id = $2",
    )
    .bind(user)
    .bind(author)
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(weight, 4.0);
    assert_eq!(count, 2);
}

#[tokio::test]
async fn session_updates_require_an_existing_row() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgEventStore::new(pool);
    let now = Utc::now();
    let session = Session {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        device_type: DeviceType::Desktop,
        started_at: now,
        ended_at: None,
        last_active_at: now,
        event_count: 0,
        feed_depth: 0,
    };
    let update = |id, user_id| SessionUpdate {
        id,
        user_id,
        at: now + Duration::seconds(30),
        ended: true,
        event_count: Some(4),
        feed_depth: Some(9),
    };

    assert!(!store.touch_session(&update(session.id, session.user_id)).await.unwrap());

    store.start_session(&session).await.unwrap();
    assert!(store.touch_session(&update(session.id, session.user_id)).await.unwrap());
    assert!(!store.touch_session(&update(session.id, Uuid::new_v4())).await.unwrap());
}

#[tokio::test]
async fn analytics_matches_in_memory_aggregation() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgEventStore::new(pool);
    let user = Uuid::new_v4();
    let post = Uuid::new_v4();
    let events = vec![
        FeedEvent::new(user, post, EventType::Impression),
        FeedEvent::new(user, post, EventType::Impression),
        FeedEvent::new(user, post, EventType::Reply),
        FeedEvent::new(user, post, EventType::Dwell).with_metadata(json!({"dwell_ms": 1200})),
    ];
    store.insert_batch(&events).await.unwrap();

    let since = Utc::now() - Duration::days(1);
    let report = store.analytics(since, 10).await.unwrap();

    assert_eq!(report.summary.total_impressions, 2);
    assert_eq!(report.summary.total_engagements, 1);
    assert_eq!(report.summary.engagement_rate, 50.0);
    assert_eq!(report.summary.avg_dwell_ms, 1200);
    assert_eq!(report.top_content.len(), 1);
    assert_eq!(report.top_content[0].engagement_score, 5.0);
}
