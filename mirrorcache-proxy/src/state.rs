use mirrorcache_core::config::ConfigStore;
use mirrorcache_observability::{MetricsCollector, Stats};
use mirrorcache_store::{BlacklistStore, MirrorRegistry, PersistentStore};
use std::sync::Arc;

/// Everything a request handler or background task needs, built once at
/// startup and passed by reference (§9 "Global mutable state"): no process
/// globals, locks live as fields of the structure that owns them.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub store: Arc<PersistentStore>,
    pub mirrors: Arc<MirrorRegistry>,
    pub blacklist: Arc<BlacklistStore>,
    pub stats: Arc<Stats>,
    pub metrics: Arc<MetricsCollector>,
    pub http: reqwest::Client,
}

impl AppState {
    pub async fn new(config: Arc<ConfigStore>, store: Arc<PersistentStore>) -> anyhow::Result<Self> {
        let mirrors = Arc::new(MirrorRegistry::new(store.clone()));
        mirrors.load_from_store().await?;

        let blacklist = Arc::new(BlacklistStore::new(store.clone()));
        blacklist.load_from_store().await?;

        let stats = Arc::new(Stats::new(store.clone()));
        stats.load_from_store().await;

        let metrics = Arc::new(MetricsCollector::new()?);

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            config,
            store,
            mirrors,
            blacklist,
            stats,
            metrics,
            http,
        })
    }
}
