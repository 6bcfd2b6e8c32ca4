//! Runtime observability.
//!
//! Metrics are collected with relaxed atomic counters plus a queue-wait
//! latency histogram; all of it is feature-gated so the hot path carries
//! zero cost when `telemetry` is disabled.

#[cfg(feature = "telemetry")]
pub mod metrics;

#[cfg(feature = "telemetry")]
pub use metrics::{Metrics, MetricsSnapshot};

// Stub implementations when telemetry is disabled
#[cfg(not(feature = "telemetry"))]
pub mod metrics {
    #[derive(Debug, Clone)]
    pub struct Metrics;

    impl Metrics {
        pub fn new() -> Self {
            Self
        }
        pub fn record_task_execution(&self, _: u64) {}
        pub fn record_task_panic(&self) {}
        pub fn record_admission(&self) {}
        pub fn record_reschedule(&self) {}
        pub fn snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    #[derive(Debug, Clone, Default)]
    pub struct MetricsSnapshot {
        pub tasks_executed: u64,
        pub tasks_panicked: u64,
        pub admissions: u64,
        pub reschedules: u64,
        pub avg_queue_wait_ns: u64,
        pub p50_queue_wait_ns: u64,
        pub p99_queue_wait_ns: u64,
    }
}
