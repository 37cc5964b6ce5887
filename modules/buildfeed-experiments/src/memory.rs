//! In-memory ExperimentStore for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use buildfeed_common::{Assignment, Experiment, FeedEvent, Variant};

use crate::store::{ExperimentStore, VariantAggregate};

#[derive(Default)]
struct State {
    experiments: HashMap<Uuid, Experiment>,
    /// (experiment, user) → variant id
    assignments: HashMap<(Uuid, Uuid), Uuid>,
    events: Vec<FeedEvent>,
}

#[derive(Default)]
pub struct MemoryExperimentStore {
    state: Mutex<State>,
    fail: AtomicBool,
}

impl MemoryExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_experiment(&self, experiment: Experiment) {
        self.state
            .lock()
            .unwrap()
            .experiments
            .insert(experiment.id, experiment);
    }

    /// Pin a user to a variant, bypassing bucketing.
    pub fn assign(&self, experiment_id: Uuid, user_id: Uuid, variant_id: Uuid) {
        self.state
            .lock()
            .unwrap()
            .assignments
            .insert((experiment_id, user_id), variant_id);
    }

    pub fn record_events(&self, events: impl IntoIterator<Item = FeedEvent>) {
        self.state.lock().unwrap().events.extend(events);
    }

    pub fn assignment_count(&self, experiment_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .assignments
            .keys()
            .filter(|(exp, _)| *exp == experiment_id)
            .count()
    }

    /// Make every call fail.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("experiment store unavailable");
        }
        Ok(())
    }

    fn lookup(state: &State, experiment_id: Uuid, user_id: Uuid) -> Option<Assignment> {
        let variant_id = *state.assignments.get(&(experiment_id, user_id))?;
        let variant = state.experiments.get(&experiment_id)?.variant(variant_id)?;
        Some(Assignment {
            experiment_id,
            user_id,
            variant_id,
            variant: variant.name.clone(),
            config: variant.config.clone(),
        })
    }
}

#[async_trait]
impl ExperimentStore for MemoryExperimentStore {
    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>> {
        self.check()?;
        let mut experiment = self.state.lock().unwrap().experiments.get(&id).cloned();
        if let Some(exp) = experiment.as_mut() {
            exp.variants.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));
        }
        Ok(experiment)
    }

    async fn get_assignment(&self, experiment_id: Uuid, user_id: Uuid) -> Result<Option<Assignment>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(Self::lookup(&state, experiment_id, user_id))
    }

    async fn insert_assignment(
        &self,
        experiment_id: Uuid,
        user_id: Uuid,
        variant_id: Uuid,
    ) -> Result<Assignment> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state
            .assignments
            .entry((experiment_id, user_id))
            .or_insert(variant_id);
        Self::lookup(&state, experiment_id, user_id)
            .ok_or_else(|| anyhow!("variant {variant_id} not in experiment {experiment_id}"))
    }

    async fn variant_aggregate(&self, experiment_id: Uuid, variant: &Variant) -> Result<VariantAggregate> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let assigned: HashSet<Uuid> = state
            .assignments
            .iter()
            .filter(|((exp, _), v)| *exp == experiment_id && **v == variant.id)
            .map(|((_, user), _)| *user)
            .collect();
        Ok(VariantAggregate::from_events(
            &state.events,
            experiment_id,
            variant,
            &assigned,
        ))
    }
}
