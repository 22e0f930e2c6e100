pub mod logger;
pub mod metrics;
pub mod stats;

pub use logger::{init, set_level, FilterHandle};
pub use metrics::MetricsCollector;
pub use stats::{Counters, DistroStats, FileStats, LogEntry, LogLevel, LogRing, Stats};
