//! Metrics collaborator for the resilience layer
//!
//! The circuit breaker and retry strategy report through a [`MetricsSink`]
//! injected at construction. Sinks are fire-and-forget: implementations
//! must absorb their own failures so that a broken metrics backend can
//! never break the resilience logic itself.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Sink for counter/gauge/timing/histogram samples, tagged by service key.
pub trait MetricsSink: Send + Sync {
    /// Counter metric (monotonically increasing)
    fn counter(&self, name: &str, value: u64, service: &str);

    /// Gauge metric (can go up and down)
    fn gauge(&self, name: &str, value: f64, service: &str);

    /// Timing metric in milliseconds
    fn timing(&self, name: &str, duration_ms: u64, service: &str);

    /// Histogram metric (statistical distribution)
    fn histogram(&self, name: &str, value: f64, service: &str);
}

/// Sink that discards every sample.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn counter(&self, _name: &str, _value: u64, _service: &str) {}

    fn gauge(&self, _name: &str, _value: f64, _service: &str) {}

    fn timing(&self, _name: &str, _duration_ms: u64, _service: &str) {}

    fn histogram(&self, _name: &str, _value: f64, _service: &str) {}
}

/// In-memory sink for tests and local inspection.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
    timings: Mutex<HashMap<String, Vec<u64>>>,
    histograms: Mutex<HashMap<String, Vec<f64>>>,
}

impl MemoryMetrics {
    /// Create an empty in-memory sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated counter value, 0 when the counter was never touched.
    pub fn counter_value(&self, name: &str, service: &str) -> u64 {
        *lock_recovering(&self.counters)
            .get(&metric_key(name, service))
            .unwrap_or(&0)
    }

    /// Most recent gauge value, if any.
    pub fn gauge_value(&self, name: &str, service: &str) -> Option<f64> {
        lock_recovering(&self.gauges)
            .get(&metric_key(name, service))
            .copied()
    }

    /// Every timing sample recorded for the metric, in order.
    pub fn timings(&self, name: &str, service: &str) -> Vec<u64> {
        lock_recovering(&self.timings)
            .get(&metric_key(name, service))
            .cloned()
            .unwrap_or_default()
    }

    /// Every histogram sample recorded for the metric, in order.
    pub fn histogram_values(&self, name: &str, service: &str) -> Vec<f64> {
        lock_recovering(&self.histograms)
            .get(&metric_key(name, service))
            .cloned()
            .unwrap_or_default()
    }
}

impl MetricsSink for MemoryMetrics {
    fn counter(&self, name: &str, value: u64, service: &str) {
        let mut counters = lock_recovering(&self.counters);
        *counters.entry(metric_key(name, service)).or_insert(0) += value;
    }

    fn gauge(&self, name: &str, value: f64, service: &str) {
        lock_recovering(&self.gauges).insert(metric_key(name, service), value);
    }

    fn timing(&self, name: &str, duration_ms: u64, service: &str) {
        lock_recovering(&self.timings)
            .entry(metric_key(name, service))
            .or_insert_with(Vec::new)
            .push(duration_ms);
    }

    fn histogram(&self, name: &str, value: f64, service: &str) {
        lock_recovering(&self.histograms)
            .entry(metric_key(name, service))
            .or_insert_with(Vec::new)
            .push(value);
    }
}

fn metric_key(name: &str, service: &str) -> String {
    format!("{}:{}", name, service)
}

// A poisoned lock only means another recorder panicked; the samples
// themselves are still usable.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_accumulates_counters() {
        let metrics = MemoryMetrics::new();

        metrics.counter("retry.attempt", 1, "api");
        metrics.counter("retry.attempt", 2, "api");
        metrics.gauge("circuit_breaker.state", 0.5, "api");
        metrics.timing("call.latency", 12, "api");
        metrics.histogram("payload.bytes", 3.0, "api");

        assert_eq!(metrics.counter_value("retry.attempt", "api"), 3);
        assert_eq!(metrics.gauge_value("circuit_breaker.state", "api"), Some(0.5));
        assert_eq!(metrics.timings("call.latency", "api"), vec![12]);
        assert_eq!(metrics.histogram_values("payload.bytes", "api"), vec![3.0]);
    }

    #[test]
    fn services_do_not_share_series() {
        let metrics = MemoryMetrics::new();

        metrics.counter("retry.attempt", 1, "s3-upload");

        assert_eq!(metrics.counter_value("retry.attempt", "s3-upload"), 1);
        assert_eq!(metrics.counter_value("retry.attempt", "bedrock-invoke"), 0);
        assert_eq!(metrics.gauge_value("retry.attempt", "s3-upload"), None);
    }
}
