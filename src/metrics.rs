use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ConsumeLabels {
    pub outcome: ConsumeStatus,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum ConsumeStatus {
    Consumed,
    SoldOut,
    LockTimeout,
    Error,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the service.
pub struct Metrics {
    // -- locks --
    pub lock_acquisitions: Counter,
    pub lock_timeouts: Counter,
    pub lock_wait_seconds: Histogram,

    // -- inventory --
    pub consume_total: Family<ConsumeLabels, Counter>,
    pub stock_remaining: Gauge,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let lock_acquisitions = Counter::default();
        registry.register(
            "lockkeeper_lock_acquisitions",
            "Distributed lock acquisitions",
            lock_acquisitions.clone(),
        );

        let lock_timeouts = Counter::default();
        registry.register(
            "lockkeeper_lock_timeouts",
            "Distributed lock waits that gave up",
            lock_timeouts.clone(),
        );

        let lock_wait_seconds = Histogram::new(exponential_buckets(0.001, 2.0, 14));
        registry.register(
            "lockkeeper_lock_wait_seconds",
            "Time spent waiting to acquire the distributed lock",
            lock_wait_seconds.clone(),
        );

        let consume_total = Family::<ConsumeLabels, Counter>::default();
        registry.register(
            "lockkeeper_consume",
            "Inventory consume requests by outcome",
            consume_total.clone(),
        );

        let stock_remaining: Gauge = Gauge::default();
        registry.register(
            "lockkeeper_stock_remaining",
            "Stock observed by the last successful consume",
            stock_remaining.clone(),
        );

        Self {
            lock_acquisitions,
            lock_timeouts,
            lock_wait_seconds,
            consume_total,
            stock_remaining,
        }
    }

    pub fn record_consume(&self, outcome: ConsumeStatus) {
        self.consume_total
            .get_or_create(&ConsumeLabels { outcome })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`crate::AppState`].
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all service metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_outcomes_are_labelled() {
        let registry = MetricsRegistry::new();
        registry.metrics.record_consume(ConsumeStatus::Consumed);
        registry.metrics.record_consume(ConsumeStatus::SoldOut);
        registry.metrics.lock_acquisitions.inc();

        let text = registry.encode().unwrap();
        assert!(text.contains("lockkeeper_consume_total{outcome=\"Consumed\"} 1"));
        assert!(text.contains("lockkeeper_consume_total{outcome=\"SoldOut\"} 1"));
        assert!(text.contains("lockkeeper_lock_acquisitions_total 1"));
    }
}
