//! Prometheus metrics for bundle persistence
//!
//! Counts what happens to bundles on their way to and from disk. Capacity
//! drops are silent to callers, so this registry is where they show up.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Metrics registry for the persistence layer.
pub struct PersistenceMetrics {
    registry: Registry,
    /// Counter: bundles written, by persistence type
    pub bundles_persisted_total: IntCounterVec,
    /// Counter: bundles refused or lost before reaching disk, by reason
    pub bundles_dropped_total: IntCounterVec,
    /// Counter: bundle files found unreadable and discarded
    pub bundles_corrupt_total: IntCounter,
    /// Counter: bundle files deleted after delivery
    pub bundles_deleted_total: IntCounter,
    /// Histogram: items per persisted bundle
    pub bundle_items: HistogramVec,
}

impl PersistenceMetrics {
    /// Creates a new `PersistenceMetrics` with all metrics registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("appinsights".to_string()), None)?;

        let bundles_persisted_total = IntCounterVec::new(
            Opts::new("bundles_persisted_total", "Bundles written to disk"),
            &["type"],
        )?;
        registry.register(Box::new(bundles_persisted_total.clone()))?;

        let bundles_dropped_total = IntCounterVec::new(
            Opts::new("bundles_dropped_total", "Bundles that never reached disk"),
            &["reason"],
        )?;
        registry.register(Box::new(bundles_dropped_total.clone()))?;

        let bundles_corrupt_total = IntCounter::new(
            "bundles_corrupt_total",
            "Bundle files discarded as unreadable",
        )?;
        registry.register(Box::new(bundles_corrupt_total.clone()))?;

        let bundles_deleted_total =
            IntCounter::new("bundles_deleted_total", "Bundle files deleted by the sender")?;
        registry.register(Box::new(bundles_deleted_total.clone()))?;

        let bundle_items = HistogramVec::new(
            HistogramOpts::new("bundle_items", "Items per persisted bundle")
                .buckets(vec![1.0, 10.0, 50.0, 100.0, 500.0, f64::INFINITY]),
            &["type"],
        )?;
        registry.register(Box::new(bundle_items.clone()))?;

        Ok(Self {
            registry,
            bundles_persisted_total,
            bundles_dropped_total,
            bundles_corrupt_total,
            bundles_deleted_total,
            bundle_items,
        })
    }

    // ========================================================================
    // Recording helpers
    // ========================================================================

    /// Record a bundle written to disk.
    pub fn record_persisted(&self, persistence_type: &str, items: usize) {
        self.bundles_persisted_total
            .with_label_values(&[persistence_type])
            .inc();
        self.bundle_items
            .with_label_values(&[persistence_type])
            .observe(items as f64);
    }

    /// Record a bundle that was refused or failed to write.
    pub fn record_dropped(&self, reason: &str) {
        self.bundles_dropped_total.with_label_values(&[reason]).inc();
    }

    /// Record a bundle file discarded as corrupt.
    pub fn record_corrupt(&self) {
        self.bundles_corrupt_total.inc();
    }

    /// Record a bundle file deleted after delivery.
    pub fn record_deleted(&self) {
        self.bundles_deleted_total.inc();
    }

    /// Total dropped bundles for one reason.
    pub fn dropped(&self, reason: &str) -> u64 {
        self.bundles_dropped_total.with_label_values(&[reason]).get()
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
