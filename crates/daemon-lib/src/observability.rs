//! Prometheus metrics for the control plane daemon.

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

/// Latency buckets sized for filesystem-bound request handling (seconds).
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

static GLOBAL_METRICS: OnceLock<DaemonMetricsInner> = OnceLock::new();

struct DaemonMetricsInner {
    requests_total: IntCounterVec,
    request_latency_seconds: HistogramVec,
    pods: IntGauge,
    allocated_containers: IntGauge,
}

impl DaemonMetricsInner {
    fn new() -> Self {
        Self {
            requests_total: register_int_counter_vec!(
                "cpuplane_requests_total",
                "Pod requests by operation and outcome",
                &["operation", "outcome"]
            )
            .expect("Failed to register requests_total"),

            request_latency_seconds: register_histogram_vec!(
                "cpuplane_request_latency_seconds",
                "Time spent handling a pod request inside the state lock",
                &["operation"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register request_latency_seconds"),

            pods: register_int_gauge!(
                "cpuplane_pods",
                "Number of pods currently tracked by the daemon"
            )
            .expect("Failed to register pods"),

            allocated_containers: register_int_gauge!(
                "cpuplane_allocated_containers",
                "Number of containers with a recorded CPU allocation"
            )
            .expect("Failed to register allocated_containers"),
        }
    }
}

/// Lightweight handle to the process-wide metrics; clones share state.
#[derive(Clone, Default)]
pub struct DaemonMetrics {
    _private: (),
}

impl DaemonMetrics {
    pub fn new() -> Self {
        let _ = GLOBAL_METRICS.get_or_init(DaemonMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &'static DaemonMetricsInner {
        GLOBAL_METRICS.get_or_init(DaemonMetricsInner::new)
    }

    pub fn observe_request(&self, operation: &str, outcome: &str, seconds: f64) {
        let inner = self.inner();
        inner
            .requests_total
            .with_label_values(&[operation, outcome])
            .inc();
        inner
            .request_latency_seconds
            .with_label_values(&[operation])
            .observe(seconds);
    }

    pub fn set_allocation_counts(&self, pods: usize, allocated_containers: usize) {
        let inner = self.inner();
        inner.pods.set(pods as i64);
        inner.allocated_containers.set(allocated_containers as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_once_and_accept_observations() {
        let metrics = DaemonMetrics::new();
        let again = DaemonMetrics::new();
        metrics.observe_request("create", "ok", 0.002);
        again.observe_request("create", "error", 0.004);
        metrics.set_allocation_counts(3, 7);
    }
}
