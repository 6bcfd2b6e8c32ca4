//! Metrics collection for runtime monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use hdrhistogram::Histogram;
use parking_lot::RwLock;

/// Runtime metrics collector
#[derive(Debug)]
pub struct Metrics {
    tasks_executed: AtomicU64,
    tasks_panicked: AtomicU64,
    admissions: AtomicU64,
    reschedules: AtomicU64,

    // Queue-wait latency: post to execution start
    wait_histogram: RwLock<Histogram<u64>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        // 3 significant figures, up to one hour in nanoseconds
        let histogram =
            Histogram::new_with_max(3_600_000_000_000, 3).expect("Failed to create histogram");

        Self {
            tasks_executed: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            admissions: AtomicU64::new(0),
            reschedules: AtomicU64::new(0),
            wait_histogram: RwLock::new(histogram),
            start_time: Instant::now(),
        }
    }

    /// Record one executed task and how long it waited in its queue.
    pub fn record_task_execution(&self, queue_wait_ns: u64) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);

        if let Some(mut hist) = self.wait_histogram.try_write() {
            let _ = hist.record(queue_wait_ns);
        }
    }

    pub fn record_task_panic(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker won the `Queued -> Running` CAS.
    pub fn record_admission(&self) {
        self.admissions.fetch_add(1, Ordering::Relaxed);
    }

    /// An admission batch ended at the scheduler's continuation marker.
    pub fn record_reschedule(&self) {
        self.reschedules.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.wait_histogram.read();

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            admissions: self.admissions.load(Ordering::Relaxed),
            reschedules: self.reschedules.load(Ordering::Relaxed),
            avg_queue_wait_ns: if histogram.len() > 0 {
                histogram.mean() as u64
            } else {
                0
            },
            p50_queue_wait_ns: histogram.value_at_quantile(0.50),
            p99_queue_wait_ns: histogram.value_at_quantile(0.99),
            max_queue_wait_ns: histogram.max(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.tasks_executed.store(0, Ordering::Relaxed);
        self.tasks_panicked.store(0, Ordering::Relaxed);
        self.admissions.store(0, Ordering::Relaxed);
        self.reschedules.store(0, Ordering::Relaxed);

        if let Some(mut hist) = self.wait_histogram.try_write() {
            hist.reset();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime: std::time::Duration,
    pub tasks_executed: u64,
    pub tasks_panicked: u64,
    pub admissions: u64,
    pub reschedules: u64,
    pub avg_queue_wait_ns: u64,
    pub p50_queue_wait_ns: u64,
    pub p99_queue_wait_ns: u64,
    pub max_queue_wait_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.record_task_execution(1_000);
        metrics.record_task_execution(2_000);
        metrics.record_task_panic();
        metrics.record_admission();

        let snap = metrics.snapshot();
        assert_eq!(snap.tasks_executed, 2);
        assert_eq!(snap.tasks_panicked, 1);
        assert_eq!(snap.admissions, 1);
        assert!(snap.avg_queue_wait_ns > 0);
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        metrics.record_task_execution(500);
        metrics.reset();

        let snap = metrics.snapshot();
        assert_eq!(snap.tasks_executed, 0);
        assert_eq!(snap.p99_queue_wait_ns, 0);
    }
}
