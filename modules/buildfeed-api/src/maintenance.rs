use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::state::AppState;

/// Periodically drop expired cache entries and reset rate-limit windows.
/// Abort the returned handle on shutdown.
pub fn spawn(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let cache_entries = state.cache.sweep_expired();
            let windows = state.limiter.sweep().await;
            if cache_entries > 0 || windows > 0 {
                debug!(cache_entries, windows, "Swept expired state");
            }
        }
    })
}
