//! Prometheus metrics for a warmup run
//!
//! A run is a one-shot process, so nothing is scraped. Metrics live on a
//! private registry and can be dumped in text format for the node_exporter
//! textfile collector at the end of the run.

use crate::error::{Result, WarmerError};
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};
use std::io::Write;
use std::path::Path;

/// Metrics collected during a warmup run
#[derive(Clone)]
pub struct WarmupMetrics {
    registry: Registry,

    /// Warmup requests by result (success / failure)
    pub requests_total: IntCounterVec,

    /// Responses by HTTP status class (2xx, 3xx, 4xx, 5xx)
    pub responses_by_class: IntCounterVec,

    /// Targets dropped after reaching the attempt limit
    pub abandoned_targets_total: IntCounter,

    /// Request duration by result
    pub request_duration_seconds: HistogramVec,

    /// Cache flushes performed
    pub cache_flushes_total: IntCounter,

    /// Target discovery attempts by result
    pub discovery_attempts_total: CounterVec,

    /// Batch size used for the most recent batch
    pub batch_size: IntGauge,

    /// Duration of the whole run
    pub run_duration_seconds: Gauge,
}

impl WarmupMetrics {
    /// Create metrics registered on a fresh private registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered on `registry`
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("node_warmer_requests_total", "Total number of warmup requests"),
            &["result"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let responses_by_class = IntCounterVec::new(
            Opts::new(
                "node_warmer_responses_total",
                "Warmup responses by HTTP status class",
            ),
            &["class"],
        )?;
        registry.register(Box::new(responses_by_class.clone()))?;

        let abandoned_targets_total = IntCounter::new(
            "node_warmer_abandoned_targets_total",
            "Targets dropped after reaching the attempt limit",
        )?;
        registry.register(Box::new(abandoned_targets_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "node_warmer_request_duration_seconds",
                "Duration of warmup requests in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["result"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let cache_flushes_total = IntCounter::new(
            "node_warmer_cache_flushes_total",
            "Number of cache flushes performed",
        )?;
        registry.register(Box::new(cache_flushes_total.clone()))?;

        let discovery_attempts_total = CounterVec::new(
            Opts::new(
                "node_warmer_discovery_attempts_total",
                "Target discovery attempts by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(discovery_attempts_total.clone()))?;

        let batch_size = IntGauge::new(
            "node_warmer_batch_size",
            "Concurrency of the most recent warmup batch",
        )?;
        registry.register(Box::new(batch_size.clone()))?;

        let run_duration_seconds = Gauge::new(
            "node_warmer_run_duration_seconds",
            "Duration of the last warmup run in seconds",
        )?;
        registry.register(Box::new(run_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            responses_by_class,
            abandoned_targets_total,
            request_duration_seconds,
            cache_flushes_total,
            discovery_attempts_total,
            batch_size,
            run_duration_seconds,
        })
    }

    /// Record a request that got a response
    pub fn record_response(&self, status: u16, duration_secs: f64) {
        self.requests_total.with_label_values(&["success"]).inc();
        self.responses_by_class
            .with_label_values(&[status_class(status)])
            .inc();
        self.request_duration_seconds
            .with_label_values(&["success"])
            .observe(duration_secs);
    }

    /// Record a transport failure
    pub fn record_failure(&self, duration_secs: f64) {
        self.requests_total.with_label_values(&["failure"]).inc();
        self.request_duration_seconds
            .with_label_values(&["failure"])
            .observe(duration_secs);
    }

    pub fn record_abandoned(&self) {
        self.abandoned_targets_total.inc();
    }

    pub fn record_discovery(&self, attempts: usize, exhausted: bool) {
        let failures = if exhausted { attempts } else { attempts.saturating_sub(1) };
        self.discovery_attempts_total
            .with_label_values(&["failure"])
            .inc_by(failures as f64);
        if !exhausted {
            self.discovery_attempts_total
                .with_label_values(&["success"])
                .inc();
        }
    }

    pub fn request_count(&self, result: &str) -> u64 {
        self.requests_total.with_label_values(&[result]).get()
    }

    /// Render all metrics in prometheus text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| WarmerError::MetricsError(format!("Non UTF-8 metrics output: {}", e)))
    }

    /// Atomically write the text format dump to `path`
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let rendered = self.render()?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| WarmerError::io_at(dir, e))?;
        tmp.write_all(rendered.as_bytes())
            .map_err(|e| WarmerError::io_at(path, e))?;
        tmp.persist(path)
            .map_err(|e| WarmerError::io_at(path, e.error))?;
        Ok(())
    }
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}
