//! Periodic idle-session eviction.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolgate_application::SessionStore;
use tracing::{debug, info};

/// Spawn a task that evicts sessions idle longer than `idle_timeout`
/// every `interval`, until `shutdown` fires.
pub fn spawn_sweeper(
    store: Arc<dyn SessionStore>,
    idle_timeout: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let idle = chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::MAX);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;
        info!(idle_secs = idle_timeout.as_secs(), "Session sweeper started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let cutoff = Utc::now().checked_sub_signed(idle).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
                    let evicted = store.evict(cutoff).await;
                    debug!(evicted, "Session sweep");
                }
            }
        }
        debug!("Session sweeper stopped");
    })
}
