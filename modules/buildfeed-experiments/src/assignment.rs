//! Stable variant assignment.
//!
//! A user's arm is a pure function of (experiment, user): the SHA-256 of
//! `experiment_id:user_id` selects a point on the variants' cumulative weights.
//! The first assignment is persisted so later weight changes never move
//! existing users.

use std::sync::Arc;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use buildfeed_common::{Assignment, Experiment, ExperimentStatus, Variant};

use crate::store::ExperimentStore;

/// Deterministic 64-bit bucket for a user in an experiment.
pub fn bucket(experiment_id: Uuid, user_id: Uuid) -> u64 {
    let digest = Sha256::digest(format!("{experiment_id}:{user_id}").as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Pick the variant whose cumulative weight range contains the user's bucket.
/// Returns None when every weight is zero.
pub fn pick_variant(experiment: &Experiment, user_id: Uuid) -> Option<&Variant> {
    let total: u64 = experiment.variants.iter().map(|v| v.weight as u64).sum();
    if total == 0 {
        return None;
    }
    let point = bucket(experiment.id, user_id) % total;
    let mut cumulative = 0u64;
    experiment.variants.iter().find(|v| {
        cumulative += v.weight as u64;
        point < cumulative
    })
}

pub fn is_assignable(experiment: &Experiment) -> bool {
    experiment.status == ExperimentStatus::Running && experiment.variants.len() >= 2
}

pub struct ExperimentAssigner {
    store: Arc<dyn ExperimentStore>,
}

impl ExperimentAssigner {
    pub fn new(store: Arc<dyn ExperimentStore>) -> Self {
        Self { store }
    }

    /// Resolve the user's arm, assigning one on first contact.
    ///
    /// Returns None for unknown experiments and for experiments that are not
    /// running or have fewer than two variants.
    pub async fn assign(&self, experiment_id: Uuid, user_id: Uuid) -> Result<Option<Assignment>> {
        if let Some(existing) = self.store.get_assignment(experiment_id, user_id).await? {
            return Ok(Some(existing));
        }

        let Some(experiment) = self.store.get_experiment(experiment_id).await? else {
            debug!(experiment_id = %experiment_id, "Assignment requested for unknown experiment");
            return Ok(None);
        };
        if !is_assignable(&experiment) {
            return Ok(None);
        }
        let Some(variant) = pick_variant(&experiment, user_id) else {
            return Ok(None);
        };

        let assignment = self
            .store
            .insert_assignment(experiment_id, user_id, variant.id)
            .await?;
        info!(
            experiment_id = %experiment_id,
            user_id = %user_id,
            variant = %assignment.variant,
            "Assigned experiment variant"
        );
        Ok(Some(assignment))
    }
}
