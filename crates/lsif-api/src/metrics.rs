//! Prometheus metrics served on `/metrics`.
//!
//! Counters are updated as requests come in. Cache figures are copied from
//! the database and document caches each time the registry is gathered.

use lsif_core::{LsifError, QueryMethod, Result};
use lsif_query::{CacheStats, Databases};
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
    Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    pub uploads: IntCounter,
    pub upload_bytes: IntCounter,
    pub failed_uploads: IntCounter,
    pub queries: IntCounterVec,
    pub query_duration: HistogramVec,
    cache_hits: IntGaugeVec,
    cache_misses: IntGaugeVec,
    cache_evictions: IntGaugeVec,
    cache_entries: IntGaugeVec,
    cache_weight: IntGaugeVec,
    cache_hit_rate: GaugeVec,
    disk_bytes: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("lsif".into()), None).map_err(metrics_error)?;
        let cache_gauge = |name: &str, help: &str| {
            IntGaugeVec::new(Opts::new(name, help), &["cache"]).map_err(metrics_error)
        };

        let metrics = Self {
            uploads: IntCounter::new("uploads_total", "Dumps stored successfully")
                .map_err(metrics_error)?,
            upload_bytes: IntCounter::new("upload_bytes_total", "Bytes received in stored dumps")
                .map_err(metrics_error)?,
            failed_uploads: IntCounter::new(
                "failed_uploads_total",
                "Uploads that were rejected or failed",
            )
            .map_err(metrics_error)?,
            queries: IntCounterVec::new(
                Opts::new("queries_total", "Requests answered, by method and outcome"),
                &["method", "outcome"],
            )
            .map_err(metrics_error)?,
            query_duration: HistogramVec::new(
                HistogramOpts::new("query_duration_seconds", "Time spent answering a request"),
                &["method"],
            )
            .map_err(metrics_error)?,
            cache_hits: cache_gauge("cache_hits", "Cache lookups served from memory")?,
            cache_misses: cache_gauge("cache_misses", "Cache lookups that had to load")?,
            cache_evictions: cache_gauge("cache_evictions", "Entries dropped to stay under budget")?,
            cache_entries: cache_gauge("cache_entries", "Entries currently resident")?,
            cache_weight: cache_gauge("cache_weight_bytes", "Weight of the resident entries")?,
            cache_hit_rate: GaugeVec::new(
                Opts::new("cache_hit_rate", "Share of lookups served from memory"),
                &["cache"],
            )
            .map_err(metrics_error)?,
            disk_bytes: Gauge::new(
                "stored_dump_bytes",
                "Bytes of stored dumps after the last upload",
            )
            .map_err(metrics_error)?,
            registry,
        };
        metrics.register()?;
        Ok(metrics)
    }

    fn register(&self) -> Result<()> {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(self.uploads.clone()),
            Box::new(self.upload_bytes.clone()),
            Box::new(self.failed_uploads.clone()),
            Box::new(self.queries.clone()),
            Box::new(self.query_duration.clone()),
            Box::new(self.cache_hits.clone()),
            Box::new(self.cache_misses.clone()),
            Box::new(self.cache_evictions.clone()),
            Box::new(self.cache_entries.clone()),
            Box::new(self.cache_weight.clone()),
            Box::new(self.cache_hit_rate.clone()),
            Box::new(self.disk_bytes.clone()),
        ];
        for collector in collectors {
            self.registry.register(collector).map_err(metrics_error)?;
        }
        Ok(())
    }

    pub fn observe_query(&self, method: QueryMethod, found: bool, seconds: f64) {
        let outcome = if found { "ok" } else { "error" };
        self.queries
            .with_label_values(&[method.name(), outcome])
            .inc();
        self.query_duration
            .with_label_values(&[method.name()])
            .observe(seconds);
    }

    pub fn set_disk_bytes(&self, bytes: u64) {
        self.disk_bytes.set(bytes as f64);
    }

    fn record_cache(&self, cache: &str, stats: &CacheStats) {
        let labels = [cache];
        self.cache_hits.with_label_values(&labels).set(stats.hits as i64);
        self.cache_misses.with_label_values(&labels).set(stats.misses as i64);
        self.cache_evictions
            .with_label_values(&labels)
            .set(stats.evictions as i64);
        self.cache_entries
            .with_label_values(&labels)
            .set(stats.entries as i64);
        self.cache_weight
            .with_label_values(&labels)
            .set(stats.total_weight as i64);
        self.cache_hit_rate
            .with_label_values(&labels)
            .set(stats.hit_rate());
    }

    /// Text exposition of every metric, with cache figures taken from `databases`.
    pub fn render(&self, databases: &Databases) -> Result<String> {
        self.record_cache("database", &databases.resident_stats());
        self.record_cache("document", &databases.blob_stats());

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer)
            .map_err(|e| LsifError::Storage(format!("metrics are not utf-8: {}", e)))
    }
}

fn metrics_error(err: prometheus::Error) -> LsifError {
    LsifError::Config(format!("metrics: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_counters_are_labelled_by_method_and_outcome() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_query(QueryMethod::Hover, true, 0.01);
        metrics.observe_query(QueryMethod::Hover, false, 0.02);
        metrics.observe_query(QueryMethod::References, true, 0.5);

        assert_eq!(metrics.queries.with_label_values(&["hover", "ok"]).get(), 1);
        assert_eq!(metrics.queries.with_label_values(&["hover", "error"]).get(), 1);
        assert_eq!(metrics.queries.with_label_values(&["references", "ok"]).get(), 1);
        assert_eq!(
            metrics
                .query_duration
                .with_label_values(&["hover"])
                .get_sample_count(),
            2
        );
    }

    #[test]
    fn registries_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.uploads.inc();
        assert_eq!(first.uploads.get(), 1);
        assert_eq!(second.uploads.get(), 0);
    }
}
