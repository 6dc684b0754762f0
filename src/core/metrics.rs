//! Update-pass metrics
//!
//! Plain in-process counters. A coordinator keeps one `UpdateMetrics` for its
//! lifetime and every pass adds to it.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Cumulative counters across update passes
#[derive(Debug, Default)]
pub struct UpdateMetrics {
    /// Completed `update_all` passes
    pub passes: AtomicU64,
    /// Items whose update returned Ok
    pub items_updated: AtomicU64,
    /// Items whose update returned an error or panicked
    pub items_failed: AtomicU64,
    /// Items skipped because the pass was cancelled
    pub items_cancelled: AtomicU64,
    pub chunks_dispatched: AtomicU64,
    pub buckets_dispatched: AtomicU64,
    /// Total wall time spent inside passes
    pub total_pass_time_ms: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl UpdateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_item_updated(&self) {
        self.items_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_item_failed(&self) {
        self.items_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_item_cancelled(&self) {
        self.items_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_dispatched(&self) {
        self.chunks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bucket_dispatched(&self) {
        self.buckets_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pass(&self, elapsed: Duration) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.total_pass_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Mark an item update as running; the returned guard marks it finished on drop
    pub fn enter_item(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { metrics: self }
    }

    /// Item updates running right now
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            items_updated: self.items_updated.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            items_cancelled: self.items_cancelled.load(Ordering::Relaxed),
            chunks_dispatched: self.chunks_dispatched.load(Ordering::Relaxed),
            buckets_dispatched: self.buckets_dispatched.load(Ordering::Relaxed),
            total_pass_time_ms: self.total_pass_time_ms.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.passes.store(0, Ordering::Relaxed);
        self.items_updated.store(0, Ordering::Relaxed);
        self.items_failed.store(0, Ordering::Relaxed);
        self.items_cancelled.store(0, Ordering::Relaxed);
        self.chunks_dispatched.store(0, Ordering::Relaxed);
        self.buckets_dispatched.store(0, Ordering::Relaxed);
        self.total_pass_time_ms.store(0, Ordering::Relaxed);
        self.peak_in_flight.store(self.in_flight(), Ordering::SeqCst);
    }
}

/// Decrements the in-flight gauge when dropped
pub struct InFlightGuard<'a> {
    metrics: &'a UpdateMetrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub passes: u64,
    pub items_updated: u64,
    pub items_failed: u64,
    pub items_cancelled: u64,
    pub chunks_dispatched: u64,
    pub buckets_dispatched: u64,
    pub total_pass_time_ms: u64,
    pub peak_in_flight: usize,
}

impl MetricsSnapshot {
    /// Items that reached the item tier, whatever the outcome
    pub fn items_attempted(&self) -> u64 {
        self.items_updated + self.items_failed + self.items_cancelled
    }

    /// Calculate success rate (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        let attempted = self.items_attempted();
        if attempted == 0 {
            0.0
        } else {
            self.items_updated as f64 / attempted as f64
        }
    }

    /// Mean wall time of a pass
    pub fn avg_pass_time(&self) -> Duration {
        if self.passes == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.total_pass_time_ms / self.passes)
        }
    }
}

/// Timer for measuring execution duration
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    /// Start a new timer
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and return duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_basic() {
        let metrics = UpdateMetrics::new();

        metrics.record_item_updated();
        metrics.record_item_updated();
        metrics.record_item_failed();
        metrics.record_item_cancelled();
        metrics.record_chunk_dispatched();
        metrics.record_bucket_dispatched();
        metrics.record_pass(Duration::from_millis(40));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.items_attempted(), 4);
        assert_eq!(snapshot.success_rate(), 0.5);
        assert_eq!(snapshot.passes, 1);
        assert_eq!(snapshot.avg_pass_time(), Duration::from_millis(40));
    }

    #[test]
    fn test_in_flight_peak() {
        let metrics = UpdateMetrics::new();
        {
            let _a = metrics.enter_item();
            let _b = metrics.enter_item();
            assert_eq!(metrics.in_flight(), 2);
        }
        let _c = metrics.enter_item();

        let snapshot = metrics.snapshot();
        assert_eq!(metrics.in_flight(), 1);
        assert_eq!(snapshot.peak_in_flight, 2);
    }

    #[test]
    fn test_reset() {
        let metrics = UpdateMetrics::new();
        metrics.record_item_updated();
        drop(metrics.enter_item());
        metrics.reset();

        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_execution_timer() {
        let timer = ExecutionTimer::start();
        thread::sleep(Duration::from_millis(10));
        let duration = timer.stop();

        assert!(duration >= Duration::from_millis(10));
    }
}
