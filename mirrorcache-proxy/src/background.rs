use std::path::Path;
use std::time::Duration;
use tokio::time::interval;
use tracing::info;

use crate::cache_engine::clean_old_cache;
use crate::state::AppState;

const TICK: Duration = Duration::from_secs(10);
const STATS_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const FILE_STATS_INTERVAL: Duration = Duration::from_secs(60);
const EVICTION_INTERVAL: Duration = Duration::from_secs(3600);

/// §4.9: wait for config readiness, run one initial filesystem scan, then
/// loop on a 10-second tick checking three independent deadlines. Runs for
/// the lifetime of the process; intended to be spawned as its own task.
pub async fn run(state: AppState) {
    wait_for_storage_ready(&state).await;

    let storage_root = state.config.snapshot().storage_path_resolved;
    state.stats.update_file_stats(Path::new(&storage_root));

    let mut next_stats_flush = tokio::time::Instant::now() + STATS_FLUSH_INTERVAL;
    let mut next_file_stats = tokio::time::Instant::now() + FILE_STATS_INTERVAL;
    let mut next_eviction = tokio::time::Instant::now() + EVICTION_INTERVAL;

    let mut ticker = interval(TICK);
    loop {
        ticker.tick().await;
        let now = tokio::time::Instant::now();
        let config = state.config.snapshot();

        if now >= next_stats_flush {
            state.stats.flush().await;
            next_stats_flush = now + STATS_FLUSH_INTERVAL;
        }

        if now >= next_file_stats {
            state.stats.update_file_stats(Path::new(&config.storage_path_resolved));
            next_file_stats = now + FILE_STATS_INTERVAL;
        }

        if now >= next_eviction {
            info!("running scheduled cache eviction sweep");
            clean_old_cache(
                Path::new(&config.storage_path_resolved),
                config.cache_days,
                config.cache_retention_enabled,
            )
            .await;
            next_eviction = now + EVICTION_INTERVAL;
        }
    }
}

async fn wait_for_storage_ready(state: &AppState) {
    loop {
        if !state.config.snapshot().storage_path_resolved.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
