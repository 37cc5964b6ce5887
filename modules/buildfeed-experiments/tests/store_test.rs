//! Integration tests for PgExperimentStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use buildfeed_common::ExperimentStatus;
use buildfeed_experiments::{ExperimentStore, PgExperimentStore};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    sqlx::migrate!("../../migrations").run(&pool).await.ok()?;

    sqlx::query("TRUNCATE experiment_assignments, experiment_variants, experiments, feed_events CASCADE")
        .execute(&pool)
        .await
        .ok()?;

    Some(pool)
}

async fn insert_event(pool: &PgPool, user: Uuid, experiment: Uuid, variant: &str, event_type: &str, metadata: serde_json::Value) {
    sqlx::query(
        r#"
        INSERT INTO feed_events (id, user_id, content_id, event_type, metadata, experiment_id, variant)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user)
    .bind(Uuid::new_v4())
    .bind(event_type)
    .bind(metadata)
    .bind(experiment)
    .bind(variant)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn experiments_assignments_and_aggregates() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgExperimentStore::new(pool.clone());
    let exp_id = Uuid::new_v4();
    let (control_id, treatment_id) = (Uuid::new_v4(), Uuid::new_v4());

    sqlx::query("INSERT INTO experiments (id, name, status) VALUES ($1, 'ranking', 'running')")
        .bind(exp_id)
        .execute(&pool)
        .await
        .unwrap();
    for (id, name, position, is_control) in [
        (treatment_id, "treatment", 1, false),
        (control_id, "control", 0, true),
    ] {
        sqlx::query(
            r#"
            INSERT INTO experiment_variants (id, experiment_id, name, weight, is_control, position, config)
            VALUES ($1, $2, $3, 50, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(exp_id)
        .bind(name)
        .bind(is_control)
        .bind(position)
        .bind(json!({ "affinity_weight": 0.5 }))
        .execute(&pool)
        .await
        .unwrap();
    }

    let experiment = store.get_experiment(exp_id).await.unwrap().unwrap();
    assert_eq!(experiment.status, ExperimentStatus::Running);
    let names: Vec<&str> = experiment.variants.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["control", "treatment"]);
    assert!(store.get_experiment(Uuid::new_v4()).await.unwrap().is_none());

    // First write wins.
    let user = Uuid::new_v4();
    let first = store.insert_assignment(exp_id, user, treatment_id).await.unwrap();
    let second = store.insert_assignment(exp_id, user, control_id).await.unwrap();
    assert_eq!(first.variant_id, treatment_id);
    assert_eq!(second.variant_id, treatment_id);
    assert_eq!(second.config, json!({ "affinity_weight": 0.5 }));

    // Only events from assigned users with the matching label count.
    let stranger = Uuid::new_v4();
    for event_type in ["impression", "impression", "like", "click"] {
        insert_event(&pool, user, exp_id, "treatment", event_type, json!({})).await;
    }
    for ms in [1000, 3000] {
        insert_event(&pool, user, exp_id, "treatment", "dwell", json!({ "dwell_ms": ms })).await;
    }
    insert_event(&pool, stranger, exp_id, "treatment", "impression", json!({})).await;
    insert_event(&pool, user, exp_id, "control", "impression", json!({})).await;

    let treatment = &experiment.variants[1];
    let agg = store.variant_aggregate(exp_id, treatment).await.unwrap();
    assert_eq!(agg.sample_size, 1);
    assert_eq!(agg.impressions, 2);
    assert_eq!(agg.engagements, 1);
    assert_eq!(agg.clicks, 1);
    assert_eq!(agg.dwell.n, 2);
    assert_eq!(agg.dwell.mean, 2000.0);
    assert_eq!(agg.dwell.variance, 2_000_000.0);

    let control = store.variant_aggregate(exp_id, &experiment.variants[0]).await.unwrap();
    assert_eq!(control.sample_size, 0);
    assert_eq!(control.impressions, 0);
}
