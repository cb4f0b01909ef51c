use std::sync::Arc;

use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Registry, TextEncoder,
};

/// Process-wide metrics registry for the series named in spec §6's
/// observability contract. The scrape endpoint (`/metrics`) and the
/// time-series DB/dashboards consuming it remain external collaborators
/// (spec §1) — this registry is only the emission side.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    pub ingest_total: IntCounterVec,
    pub dmq_append_total: IntCounterVec,
    pub dmq_stream_length: IntGauge,
    pub worker_processed_total: IntCounterVec,
    pub worker_batch_size: HistogramVec,
    pub pls_query_duration: HistogramVec,
    pub pls_insert_duration: HistogramVec,
    pub pool_size: IntGauge,
    pub pool_in_use: IntGauge,
    pub pool_available: IntGauge,
    pub pool_acquire_duration: prometheus::Histogram,
    pub pool_long_held_total: IntCounterVec,
    pub pool_long_held_gauge: IntGaugeVec,
    pub pool_leak_total: prometheus::IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ingest_total = IntCounterVec::new(
            prometheus::Opts::new("logpipe_ingest_total", "Ingested records by log level"),
            &["level"],
        )
        .unwrap();

        let dmq_append_total = IntCounterVec::new(
            prometheus::Opts::new(
                "logpipe_dmq_append_total",
                "DMQ append attempts by outcome",
            ),
            &["outcome"],
        )
        .unwrap();

        let dmq_stream_length =
            IntGauge::new("logpipe_dmq_stream_length", "Current DMQ stream length").unwrap();

        let worker_processed_total = IntCounterVec::new(
            prometheus::Opts::new(
                "logpipe_worker_processed_total",
                "Worker-processed logs by outcome",
            ),
            &["outcome"],
        )
        .unwrap();

        let worker_batch_size = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "logpipe_worker_batch_size",
                "Distribution of worker batch sizes",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
            &["consumer_id"],
        )
        .unwrap();

        let pls_query_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "logpipe_pls_query_duration_seconds",
                "PLS query duration",
            ),
            &["operation"],
        )
        .unwrap();

        let pls_insert_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "logpipe_pls_insert_duration_seconds",
                "PLS batch-insert duration",
            ),
            &["outcome"],
        )
        .unwrap();

        let pool_size = IntGauge::new("logpipe_pool_size", "PLS pool total size").unwrap();
        let pool_in_use = IntGauge::new("logpipe_pool_in_use", "PLS pool sessions in use").unwrap();
        let pool_available =
            IntGauge::new("logpipe_pool_available", "PLS pool idle sessions").unwrap();

        let pool_acquire_duration = prometheus::Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "logpipe_pool_acquire_duration_seconds",
                "PLS pool acquisition duration",
            ),
        )
        .unwrap();

        let pool_long_held_total = IntCounterVec::new(
            prometheus::Opts::new(
                "logpipe_pool_long_held_total",
                "Sessions that crossed a leak threshold, by threshold",
            ),
            &["threshold_secs"],
        )
        .unwrap();

        let pool_long_held_gauge = IntGaugeVec::new(
            prometheus::Opts::new(
                "logpipe_pool_long_held_current",
                "Sessions currently past a leak threshold, by threshold",
            ),
            &["threshold_secs"],
        )
        .unwrap();

        let pool_leak_total =
            prometheus::IntCounter::new("logpipe_pool_leak_total", "Cumulative leaked sessions")
                .unwrap();

        for c in [
            Box::new(ingest_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(dmq_append_total.clone()),
            Box::new(dmq_stream_length.clone()),
            Box::new(worker_processed_total.clone()),
            Box::new(worker_batch_size.clone()),
            Box::new(pls_query_duration.clone()),
            Box::new(pls_insert_duration.clone()),
            Box::new(pool_size.clone()),
            Box::new(pool_in_use.clone()),
            Box::new(pool_available.clone()),
            Box::new(pool_acquire_duration.clone()),
            Box::new(pool_long_held_total.clone()),
            Box::new(pool_long_held_gauge.clone()),
            Box::new(pool_leak_total.clone()),
        ] {
            registry.register(c).expect("metric registration is infallible for unique names");
        }

        Self {
            registry: Arc::new(registry),
            ingest_total,
            dmq_append_total,
            dmq_stream_length,
            worker_processed_total,
            worker_batch_size,
            pls_query_duration,
            pls_insert_duration,
            pool_size,
            pool_in_use,
            pool_available,
            pool_acquire_duration,
            pool_long_held_total,
            pool_long_held_gauge,
            pool_leak_total,
        }
    }

    /// Render the registry in Prometheus text exposition format, for the
    /// `/metrics` route.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).expect("text encoding is infallible");
        String::from_utf8(buf).expect("prometheus text output is valid utf8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_nonempty_text_exposition() {
        let metrics = Metrics::new();
        metrics.ingest_total.with_label_values(&["INFO"]).inc();
        let text = metrics.encode();
        assert!(text.contains("logpipe_ingest_total"));
    }
}
