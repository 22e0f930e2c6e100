use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus metrics collector, exposed via an always-on scrape endpoint.
pub struct MetricsCollector {
    registry: Registry,
    pub requests_total: IntCounterVec,
    pub cache_hits_total: IntCounterVec,
    pub cache_misses_total: IntCounterVec,
    pub bytes_served_total: IntCounterVec,
    pub upstream_latency: HistogramVec,
    pub active_connections: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("mirrorcache_requests_total", "Total proxied requests").namespace("mirrorcache"),
            &["distro", "outcome"],
        )?;
        let cache_hits_total = IntCounterVec::new(
            Opts::new("mirrorcache_cache_hits_total", "Cache hits").namespace("mirrorcache"),
            &["distro"],
        )?;
        let cache_misses_total = IntCounterVec::new(
            Opts::new("mirrorcache_cache_misses_total", "Cache misses").namespace("mirrorcache"),
            &["distro"],
        )?;
        let bytes_served_total = IntCounterVec::new(
            Opts::new("mirrorcache_bytes_served_total", "Bytes streamed to clients").namespace("mirrorcache"),
            &["distro"],
        )?;
        let upstream_latency = HistogramVec::new(
            HistogramOpts::new("mirrorcache_upstream_latency_seconds", "Upstream fetch latency")
                .namespace("mirrorcache")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0]),
            &["mirror"],
        )?;
        let active_connections = IntGauge::new(
            "mirrorcache_active_connections",
            "Open client connections (includes CONNECT tunnels)",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(bytes_served_total.clone()))?;
        registry.register(Box::new(upstream_latency.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            cache_hits_total,
            cache_misses_total,
            bytes_served_total,
            upstream_latency,
            active_connections,
        })
    }

    /// Prometheus text exposition for `/metrics`.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("failed to construct metrics collector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_text_includes_registered_metric_names() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.requests_total.with_label_values(&["ubuntu", "hit"]).inc();
        let text = metrics.gather_text();
        assert!(text.contains("mirrorcache_requests_total"));
    }
}
