use mirrorcache_store::PersistentStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, info};
use walkdir::WalkDir;

const MAX_LOG_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub time: String,
    pub level: LogLevel,
    pub message: String,
}

/// Bounded FIFO of the most recent human-readable log lines, independent of
/// (and in addition to) the structured `tracing` stream — this backs the
/// `logs` field of `/stats` (§3, §10.2).
#[derive(Default)]
pub struct LogRing {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, level: LogLevel, message: impl Into<String>) {
        let now = chrono::Local::now().format("%H:%M:%S").to_string();
        let mut entries = self.entries.lock();
        entries.push_back(LogEntry {
            time: now,
            level,
            message: message.into(),
        });
        while entries.len() > MAX_LOG_ENTRIES {
            entries.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

/// Four monotone request counters (§3). Each field is a plain atomic so
/// increments never block and are never held across I/O (§5).
#[derive(Default)]
pub struct Counters {
    pub requests_total: AtomicI64,
    pub cache_hits: AtomicI64,
    pub cache_misses: AtomicI64,
    pub bytes_served: AtomicI64,
}

impl Counters {
    fn snapshot(&self) -> HashMap<&'static str, i64> {
        let mut map = HashMap::new();
        map.insert("requests_total", self.requests_total.load(Ordering::Relaxed));
        map.insert("cache_hits", self.cache_hits.load(Ordering::Relaxed));
        map.insert("cache_misses", self.cache_misses.load(Ordering::Relaxed));
        map.insert("bytes_served", self.bytes_served.load(Ordering::Relaxed));
        map
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DistroStats {
    pub files: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileStats {
    pub total_files: u64,
    pub total_size: u64,
    pub distro_stats: HashMap<String, DistroStats>,
}

/// Aggregates §4.3's counters, log ring, and filesystem snapshot, and
/// flushes the counters into the persistent store.
pub struct Stats {
    pub counters: Counters,
    pub log_ring: LogRing,
    file_stats: parking_lot::RwLock<FileStats>,
    start_time: Instant,
    store: Arc<PersistentStore>,
}

impl Stats {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self {
            counters: Counters::default(),
            log_ring: LogRing::new(),
            file_stats: parking_lot::RwLock::new(FileStats::default()),
            start_time: Instant::now(),
            store,
        }
    }

    pub async fn load_from_store(&self) {
        match self.store.load_stats().await {
            Ok(values) => {
                if let Some(v) = values.get("requests_total") {
                    self.counters.requests_total.store(*v, Ordering::Relaxed);
                }
                if let Some(v) = values.get("cache_hits") {
                    self.counters.cache_hits.store(*v, Ordering::Relaxed);
                }
                if let Some(v) = values.get("cache_misses") {
                    self.counters.cache_misses.store(*v, Ordering::Relaxed);
                }
                if let Some(v) = values.get("bytes_served") {
                    self.counters.bytes_served.store(*v, Ordering::Relaxed);
                }
            }
            Err(e) => error!(error = %e, "failed to load stats from store"),
        }
    }

    pub fn add_log(&self, level: LogLevel, message: impl Into<String>) {
        self.log_ring.push(level, message);
    }

    /// Flush the four counters into the `stats` table (§4.3, §4.9).
    pub async fn flush(&self) {
        let snapshot = self.counters.snapshot();
        if let Err(e) = self.store.save_stats(&snapshot).await {
            error!(error = %e, "failed to flush stats to store");
        }
    }

    /// Walk the storage tree once, aggregating size per top-level directory
    /// (§4.3). Hidden entries (dotfiles) at the top level are skipped.
    pub fn update_file_stats(&self, storage_root: &Path) {
        let mut total_files = 0u64;
        let mut total_size = 0u64;
        let mut distro_stats: HashMap<String, DistroStats> = HashMap::new();

        if !storage_root.exists() {
            return;
        }

        for entry in WalkDir::new(storage_root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(storage_root) else {
                continue;
            };
            let Some(distro) = rel.components().next().map(|c| c.as_os_str().to_string_lossy().into_owned())
            else {
                continue;
            };
            if distro.starts_with('.') {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            total_files += 1;
            total_size += size;

            let slot = distro_stats.entry(distro).or_default();
            slot.files += 1;
            slot.size += size;
        }

        *self.file_stats.write() = FileStats {
            total_files,
            total_size,
            distro_stats,
        };
        info!(total_files, total_size, "file stats updated");
    }

    pub fn file_stats(&self) -> FileStats {
        self.file_stats.read().clone()
    }

    pub fn snapshot_counters(&self) -> HashMap<&'static str, i64> {
        self.counters.snapshot()
    }

    /// `HH:MM:SS` uptime string, matching the source's naive duration
    /// formatting (days are rolled into the hours component).
    pub fn uptime_string(&self) -> String {
        let secs = self.start_time.elapsed().as_secs();
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Wall-clock timestamp, used only for tests that need a concrete "now".
pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_ring_evicts_oldest_when_full() {
        let ring = LogRing::new();
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            ring.push(LogLevel::Info, format!("entry {i}"));
        }
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), MAX_LOG_ENTRIES);
        assert_eq!(snapshot.first().unwrap().message, "entry 10");
    }

    #[tokio::test]
    async fn counters_snapshot_reflects_increments() {
        let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
        let stats = Stats::new(store);
        stats.counters.requests_total.fetch_add(3, Ordering::Relaxed);
        stats.counters.bytes_served.fetch_add(1024, Ordering::Relaxed);
        let snap = stats.snapshot_counters();
        assert_eq!(snap["requests_total"], 3);
        assert_eq!(snap["bytes_served"], 1024);
    }

    #[tokio::test]
    async fn flush_then_load_round_trips_through_store() {
        let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
        let stats = Stats::new(store.clone());
        stats.counters.cache_hits.fetch_add(7, Ordering::Relaxed);
        stats.flush().await;

        let reloaded = Stats::new(store);
        reloaded.load_from_store().await;
        assert_eq!(reloaded.snapshot_counters()["cache_hits"], 7);
    }

    #[tokio::test]
    async fn update_file_stats_aggregates_per_top_level_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ubuntu/ab")).unwrap();
        std::fs::write(dir.path().join("ubuntu/ab/abcd_x.deb"), b"hello").unwrap();
        std::fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join(".hidden/should-be-skipped"), b"x").unwrap();

        let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
        let stats = Stats::new(store);
        stats.update_file_stats(dir.path());

        let snapshot = stats.file_stats();
        assert_eq!(snapshot.total_files, 1);
        assert_eq!(snapshot.total_size, 5);
        assert_eq!(snapshot.distro_stats["ubuntu"].files, 1);
        assert!(!snapshot.distro_stats.contains_key(".hidden"));
    }

    #[tokio::test]
    async fn uptime_string_is_hh_mm_ss() {
        let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
        let stats = Stats::new(store);
        let uptime = stats.uptime_string();
        assert_eq!(uptime.len(), 8);
        assert_eq!(uptime.chars().nth(2), Some(':'));
    }
}
