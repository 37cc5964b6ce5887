//! Assignment and results against the in-memory store.

use std::sync::Arc;

use buildfeed_common::{EventType, Experiment, ExperimentStatus, FeedEvent, Variant};
use buildfeed_experiments::{
    ExperimentAnalyzer, ExperimentAssigner, ExperimentError, MemoryExperimentStore,
};
use serde_json::json;
use uuid::Uuid;

fn experiment(arms: &[&str]) -> Experiment {
    let id = Uuid::new_v4();
    Experiment {
        id,
        name: "affinity boost".into(),
        description: Some("Weight author affinity in ranking".into()),
        status: ExperimentStatus::Running,
        started_at: None,
        ended_at: None,
        variants: arms
            .iter()
            .enumerate()
            .map(|(i, name)| Variant {
                id: Uuid::new_v4(),
                experiment_id: id,
                name: name.to_string(),
                weight: 50,
                is_control: i == 0,
                position: i as i32,
                config: json!({ "affinity_weight": i as f64 * 0.5 }),
            })
            .collect(),
    }
}

/// One assigned user per arm emitting `impressions` impressions of which
/// `engagements` are followed by a like.
fn traffic(
    store: &MemoryExperimentStore,
    exp: &Experiment,
    arm: &Variant,
    impressions: usize,
    engagements: usize,
) {
    let user = Uuid::new_v4();
    store.assign(exp.id, user, arm.id);
    let mut events = Vec::new();
    for i in 0..impressions {
        let post = Uuid::new_v4();
        events.push(FeedEvent::new(user, post, EventType::Impression).with_experiment(exp.id, &arm.name));
        if i < engagements {
            events.push(FeedEvent::new(user, post, EventType::Like).with_experiment(exp.id, &arm.name));
        }
    }
    store.record_events(events);
}

#[tokio::test]
async fn higher_engagement_variant_wins() {
    let store = Arc::new(MemoryExperimentStore::new());
    let exp = experiment(&["control", "boosted"]);
    store.add_experiment(exp.clone());
    traffic(&store, &exp, &exp.variants[0], 100, 10);
    traffic(&store, &exp, &exp.variants[1], 100, 25);

    let results = ExperimentAnalyzer::new(store.clone())
        .results(exp.id)
        .await
        .unwrap();

    assert!(results.is_significant);
    assert_eq!(results.confidence_level, 0.95);
    assert_eq!(results.winner, Some(exp.variants[1].id));

    let boosted = &results.variants[1];
    let engagement = &boosted.metrics.engagement_rate;
    assert_eq!(engagement.value, 0.25);
    assert!((engagement.relative_change - 1.5).abs() < 1e-9);
    assert!(engagement.p_value.unwrap() < 0.05);
    assert!(engagement.is_significant);

    let control = &results.variants[0];
    assert!(control.is_control);
    assert_eq!(control.metrics.engagement_rate.p_value, None);
    assert_eq!(control.sample_size, 1);
}

#[tokio::test]
async fn identical_arms_have_no_winner() {
    let store = Arc::new(MemoryExperimentStore::new());
    let exp = experiment(&["control", "same"]);
    store.add_experiment(exp.clone());
    traffic(&store, &exp, &exp.variants[0], 200, 30);
    traffic(&store, &exp, &exp.variants[1], 200, 30);

    let results = ExperimentAnalyzer::new(store).results(exp.id).await.unwrap();

    assert!(!results.is_significant);
    assert_eq!(results.winner, None);
    assert_eq!(results.variants[1].metrics.engagement_rate.relative_change, 0.0);
}

#[tokio::test]
async fn significantly_worse_variant_leaves_control_winning() {
    let store = Arc::new(MemoryExperimentStore::new());
    let exp = experiment(&["control", "worse"]);
    store.add_experiment(exp.clone());
    traffic(&store, &exp, &exp.variants[0], 100, 25);
    traffic(&store, &exp, &exp.variants[1], 100, 10);

    let results = ExperimentAnalyzer::new(store).results(exp.id).await.unwrap();

    assert!(results.is_significant);
    assert_eq!(results.winner, Some(exp.variants[0].id));
}

#[tokio::test]
async fn empty_arms_produce_finite_results() {
    let store = Arc::new(MemoryExperimentStore::new());
    let exp = experiment(&["control", "treatment"]);
    store.add_experiment(exp.clone());

    let results = ExperimentAnalyzer::new(store).results(exp.id).await.unwrap();

    assert!(!results.is_significant);
    let body = serde_json::to_string(&results).unwrap();
    assert!(!body.contains("NaN") && !body.contains("inf"));
}

#[tokio::test]
async fn single_variant_is_rejected() {
    let store = Arc::new(MemoryExperimentStore::new());
    let exp = experiment(&["only"]);
    store.add_experiment(exp.clone());

    let err = ExperimentAnalyzer::new(store).results(exp.id).await.unwrap_err();
    assert!(matches!(err, ExperimentError::InsufficientVariants(1)));
}

#[tokio::test]
async fn unknown_experiment_is_not_found() {
    let store = Arc::new(MemoryExperimentStore::new());
    let id = Uuid::new_v4();

    let err = ExperimentAnalyzer::new(store).results(id).await.unwrap_err();
    assert!(matches!(err, ExperimentError::NotFound(missing) if missing == id));
}

#[tokio::test]
async fn assignment_is_stable_and_persisted_once() {
    let store = Arc::new(MemoryExperimentStore::new());
    let exp = experiment(&["control", "treatment"]);
    store.add_experiment(exp.clone());
    let assigner = ExperimentAssigner::new(store.clone());
    let user = Uuid::new_v4();

    let first = assigner.assign(exp.id, user).await.unwrap().unwrap();
    let again = assigner.assign(exp.id, user).await.unwrap().unwrap();

    assert_eq!(first, again);
    assert_eq!(store.assignment_count(exp.id), 1);
    assert!(exp.variant(first.variant_id).is_some());
}

#[tokio::test]
async fn existing_assignment_wins_over_bucketing() {
    let store = Arc::new(MemoryExperimentStore::new());
    let exp = experiment(&["control", "treatment"]);
    store.add_experiment(exp.clone());
    let user = Uuid::new_v4();
    let pinned = exp.variants[1].id;
    store.assign(exp.id, user, pinned);

    let assignment = ExperimentAssigner::new(store)
        .assign(exp.id, user)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(assignment.variant_id, pinned);
    assert_eq!(assignment.config, json!({ "affinity_weight": 0.5 }));
}

#[tokio::test]
async fn draft_experiments_do_not_assign() {
    let store = Arc::new(MemoryExperimentStore::new());
    let mut exp = experiment(&["control", "treatment"]);
    exp.status = ExperimentStatus::Draft;
    store.add_experiment(exp.clone());

    let assigner = ExperimentAssigner::new(store.clone());
    assert!(assigner.assign(exp.id, Uuid::new_v4()).await.unwrap().is_none());
    assert!(assigner.assign(Uuid::new_v4(), Uuid::new_v4()).await.unwrap().is_none());
    assert_eq!(store.assignment_count(exp.id), 0);
}
