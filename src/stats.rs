use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-processor counters updated by its workers during a run.
///
/// Counters only ever increase. They are safe to read at any time but are
/// guaranteed stable only after the pipeline has reached a terminal state.
#[derive(Debug, Default)]
pub struct NodeStats {
    payloads_received: AtomicU64,
    payloads_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    execution_nanos: AtomicU64,
}

impl NodeStats {
    /// Create a zeroed counter set
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.payloads_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.payloads_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_execution(&self, elapsed: Duration) {
        self.execution_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Number of payloads received from the input link
    pub fn payloads_received(&self) -> u64 {
        self.payloads_received.load(Ordering::Relaxed)
    }

    /// Number of payloads emitted to the output link
    pub fn payloads_sent(&self) -> u64 {
        self.payloads_sent.load(Ordering::Relaxed)
    }

    /// Total bytes received from the input link
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Total bytes emitted to the output link
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get a snapshot with derived averages calculated
    pub fn snapshot(&self) -> StatsSnapshot {
        let payloads_received = self.payloads_received();
        let payloads_sent = self.payloads_sent();
        let total_bytes_received = self.bytes_received();
        let total_bytes_sent = self.bytes_sent();
        let total_execution_time =
            self.execution_nanos.load(Ordering::Relaxed) as f64 / 1_000_000_000.0;

        StatsSnapshot {
            payloads_received,
            payloads_sent,
            total_bytes_received,
            total_bytes_sent,
            total_execution_time,
            avg_execution_time: average_f(total_execution_time, payloads_received),
            avg_bytes_received: average(total_bytes_received, payloads_received),
            avg_bytes_sent: average(total_bytes_sent, payloads_sent),
        }
    }
}

fn average(total: u64, count: u64) -> u64 {
    if count == 0 {
        0
    } else {
        total / count
    }
}

fn average_f(total: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// A point-in-time view of one processor's counters
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub payloads_received: u64,
    pub payloads_sent: u64,
    pub total_bytes_received: u64,
    pub total_bytes_sent: u64,
    /// Cumulative seconds spent inside `process_data`, across all workers
    pub total_execution_time: f64,
    pub avg_execution_time: f64,
    pub avg_bytes_received: u64,
    pub avg_bytes_sent: u64,
}

impl StatsSnapshot {
    /// Format the snapshot as a single human-readable line
    pub fn format(&self) -> String {
        format!(
            "Sent/Received: {}/{} payloads, {}/{} bytes, Execution: {:.6}s total / {:.6}s avg",
            self.payloads_sent,
            self.payloads_received,
            self.total_bytes_sent,
            self.total_bytes_received,
            self.total_execution_time,
            self.avg_execution_time,
        )
    }
}

/// Wall-clock timer for a single run.
///
/// Started at `run`, stopped exactly once by the completion watcher.
/// Reading the elapsed time while the run is in flight returns the time
/// so far.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    stopped: Mutex<Option<Duration>>,
}

impl Timer {
    /// Start the clock
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            stopped: Mutex::new(None),
        }
    }

    /// Stop the clock. Later calls keep the first recorded duration.
    pub fn stop(&self) {
        let mut stopped = self.stopped.lock();
        if stopped.is_none() {
            *stopped = Some(self.start.elapsed());
        }
    }

    /// Elapsed run time
    pub fn elapsed(&self) -> Duration {
        self.stopped.lock().unwrap_or_else(|| self.start.elapsed())
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}s", self.elapsed().as_secs_f64())
    }
}
