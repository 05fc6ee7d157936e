//! Periodic background work: idle dataset eviction and config file watching.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Close datasets that have been idle longer than their timeout.
pub fn spawn_eviction(state: Arc<AppState>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "Dataset eviction task started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let task_state = state.clone();
            match tokio::task::spawn_blocking(move || task_state.evict_idle()).await {
                Ok(0) => debug!("No idle datasets"),
                Ok(closed) => info!(closed, "Closed idle datasets"),
                Err(e) => warn!(error = %e, "Dataset eviction failed"),
            }
        }
    })
}

/// Reload the configuration whenever its file changes.
pub fn spawn_config_watch(state: Arc<AppState>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = period.as_secs(),
            path = ?state.config_path(),
            "Config watch task started"
        );
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let task_state = state.clone();
            match tokio::task::spawn_blocking(move || task_state.reload_if_changed()).await {
                Ok(Some(generation)) => {
                    state.capabilities.invalidate().await;
                    info!(generation, "Configuration file changed, reloaded");
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Config watch failed"),
            }
        }
    })
}
