use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A simple percentile tracker that maintains a sliding window of task durations
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a new percentile tracker with a specified window size
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record a measurement (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    /// Median task duration in milliseconds
    pub fn p50_ms(&self) -> f64 {
        self.percentile(0.50)
    }

    /// 95th percentile task duration in milliseconds
    pub fn p95_ms(&self) -> f64 {
        self.percentile(0.95)
    }

    /// 99th percentile task duration in milliseconds
    pub fn p99_ms(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let measurements = self.measurements.lock();
        if measurements.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<_> = measurements.iter().copied().collect();
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1_000_000.0
    }

    /// Get the count of recorded measurements
    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Per-stage counters, shared by every task of one stage run
#[derive(Debug, Clone)]
pub struct StageMetrics {
    records_read: Arc<AtomicU64>,
    pairs_emitted: Arc<AtomicU64>,
    keys_reduced: Arc<AtomicU64>,
    records_written: Arc<AtomicU64>,
    task_retries: Arc<AtomicU64>,
    task_durations: PercentileTracker,
    start_time: Instant,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self {
            records_read: Arc::new(AtomicU64::new(0)),
            pairs_emitted: Arc::new(AtomicU64::new(0)),
            keys_reduced: Arc::new(AtomicU64::new(0)),
            records_written: Arc::new(AtomicU64::new(0)),
            task_retries: Arc::new(AtomicU64::new(0)),
            task_durations: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    /// Count input records consumed by a committed map task
    pub fn record_read(&self, n: u64) {
        self.records_read.fetch_add(n, Ordering::Relaxed);
    }

    /// Count key/value pairs emitted by a committed map task
    pub fn record_emitted(&self, n: u64) {
        self.pairs_emitted.fetch_add(n, Ordering::Relaxed);
    }

    /// Count key groups handed to reduce
    pub fn record_keys(&self, n: u64) {
        self.keys_reduced.fetch_add(n, Ordering::Relaxed);
    }

    /// Count output records produced by a committed reduce task
    pub fn record_written(&self, n: u64) {
        self.records_written.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a failed task attempt that will be retried
    pub fn record_retry(&self) {
        self.task_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one task attempt took
    pub fn record_task(&self, elapsed: Duration) {
        self.task_durations.record(elapsed.as_nanos() as u64);
    }

    pub fn records_read(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn pairs_emitted(&self) -> u64 {
        self.pairs_emitted.load(Ordering::Relaxed)
    }

    pub fn keys_reduced(&self) -> u64 {
        self.keys_reduced.load(Ordering::Relaxed)
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn task_retries(&self) -> u64 {
        self.task_retries.load(Ordering::Relaxed)
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_read: self.records_read(),
            pairs_emitted: self.pairs_emitted(),
            keys_reduced: self.keys_reduced(),
            records_written: self.records_written(),
            task_retries: self.task_retries(),
            tasks: self.task_durations.count(),
            task_p50_ms: self.task_durations.p50_ms(),
            task_p95_ms: self.task_durations.p95_ms(),
            task_p99_ms: self.task_durations.p99_ms(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of stage metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub records_read: u64,
    pub pairs_emitted: u64,
    pub keys_reduced: u64,
    pub records_written: u64,
    pub task_retries: u64,
    pub tasks: usize,
    pub task_p50_ms: f64,
    pub task_p95_ms: f64,
    pub task_p99_ms: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Read: {}, Emitted: {}, Keys: {}, Written: {}, Retries: {}, \
             Tasks: {} (P50: {:.2}ms, P95: {:.2}ms, P99: {:.2}ms), Elapsed: {:.2}s",
            self.records_read,
            self.pairs_emitted,
            self.keys_reduced,
            self.records_written,
            self.task_retries,
            self.tasks,
            self.task_p50_ms,
            self.task_p95_ms,
            self.task_p99_ms,
            self.elapsed.as_secs_f64()
        )
    }
}
