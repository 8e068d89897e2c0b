//! Self-telemetry for the exporter process
//!
//! The federation endpoint serves other services' metrics; these are the
//! exporter's own, registered once in the default registry and exposed on
//! `/internal/metrics`.

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;

/// Buckets for whole-collection latency (seconds); a collection spans two
/// network fan-outs, so this reaches well past the per-call timeout.
const COLLECTION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static GLOBAL_METRICS: OnceLock<ExporterMetricsInner> = OnceLock::new();

struct ExporterMetricsInner {
    collections_total: IntCounter,
    collection_errors_total: IntCounter,
    collection_duration_seconds: Histogram,
    registry_endpoints: IntGauge,
    application_results: IntGauge,
}

impl ExporterMetricsInner {
    fn new() -> Self {
        Self {
            collections_total: register_int_counter!(
                "eureka_exporter_collections_total",
                "Total number of collection requests served"
            )
            .expect("Failed to register collections_total"),

            collection_errors_total: register_int_counter!(
                "eureka_exporter_collection_errors_total",
                "Collection requests that failed with a server error"
            )
            .expect("Failed to register collection_errors_total"),

            collection_duration_seconds: register_histogram!(
                "eureka_exporter_collection_duration_seconds",
                "Wall time of one full discover and scrape cycle",
                COLLECTION_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_duration_seconds"),

            registry_endpoints: register_int_gauge!(
                "eureka_exporter_registry_endpoints",
                "Registry endpoints discovered by the last collection"
            )
            .expect("Failed to register registry_endpoints"),

            application_results: register_int_gauge!(
                "eureka_exporter_application_results",
                "Application endpoints that contributed metrics in the last collection"
            )
            .expect("Failed to register application_results"),
        }
    }
}

/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    _private: (),
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &'static ExporterMetricsInner {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new)
    }

    pub fn record_collection(&self, duration_secs: f64) {
        let inner = self.inner();
        inner.collections_total.inc();
        inner.collection_duration_seconds.observe(duration_secs);
    }

    pub fn record_collection_error(&self) {
        self.inner().collection_errors_total.inc();
    }

    pub fn set_registry_endpoints(&self, count: usize) {
        self.inner().registry_endpoints.set(count as i64);
    }

    pub fn set_application_results(&self, count: usize) {
        self.inner().application_results.set(count as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        // second handle must not panic on duplicate registration
        let a = ExporterMetrics::new();
        let b = ExporterMetrics::new();
        a.record_collection(0.05);
        b.set_registry_endpoints(3);
        b.record_collection_error();
    }
}
