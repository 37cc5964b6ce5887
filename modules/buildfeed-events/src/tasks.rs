//! Bounded pool for fire-and-forget side effects.
//!
//! Jobs run off the request path with at most `max_concurrency` in flight.
//! Their errors are logged and otherwise discarded.

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub struct BestEffort {
    permits: Arc<Semaphore>,
    inflight: Mutex<JoinSet<()>>,
}

impl BestEffort {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            inflight: Mutex::new(JoinSet::new()),
        }
    }

    /// Run a group of jobs in parallel in the background. Failures are
    /// collected and reported in one log line.
    pub fn dispatch_all<F>(&self, label: &'static str, jobs: Vec<F>)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if jobs.is_empty() {
            return;
        }

        let permits = self.permits.clone();
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        // Reap finished groups so the set does not grow with traffic.
        while inflight.try_join_next().is_some() {}

        inflight.spawn(async move {
            let total = jobs.len();
            let results = join_all(jobs.into_iter().map(|job| {
                let permits = permits.clone();
                async move {
                    let _permit = permits.acquire_owned().await.ok();
                    job.await
                }
            }))
            .await;

            let failures: Vec<anyhow::Error> = results.into_iter().filter_map(Result::err).collect();
            match failures.first() {
                Some(first) => warn!(
                    label,
                    failed = failures.len(),
                    total,
                    error = %first,
                    "Best-effort jobs failed"
                ),
                None => debug!(label, total, "Best-effort jobs completed"),
            }
        });
    }

    /// Wait for every dispatched group to settle.
    pub async fn drain(&self) {
        let mut pending = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *inflight, JoinSet::new())
        };
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Best-effort task aborted");
            }
        }
    }
}
