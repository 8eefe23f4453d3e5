//! Write-path metrics
//!
//! Lightweight, thread-safe counters for the batch write engine. One
//! `Metrics` is shared (in an `Arc`) by every writer of a `ResultsStorage`.
//!
//! Tracked:
//! - write passes, retries and exhausted executions
//! - rows written and row failures
//! - pass latencies with percentiles over a rolling window
//!
//! # Example
//!
//! ```no_run
//! use matchup_store::metrics::Metrics;
//!
//! let metrics = Metrics::new();
//! metrics.record_pass(1024, 0, 35);
//!
//! let stats = metrics.snapshot();
//! println!("p50: {}ms", stats.pass_p50_ms);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;

/// Number of recent pass latencies kept for percentile calculation.
const LATENCY_WINDOW_SIZE: usize = 256;

pub struct Metrics {
    // ========================================================================
    // Pass Metrics
    // ========================================================================
    /// Write passes started, first attempts and retries alike
    pass_count: AtomicU64,

    /// Passes in which at least one row failed
    failed_pass_count: AtomicU64,

    /// Rolling window of recent pass latencies
    pass_latencies_ms: Mutex<VecDeque<u64>>,

    last_pass_ms: AtomicU64,

    // ========================================================================
    // Row Metrics
    // ========================================================================
    rows_written: AtomicU64,

    row_failures: AtomicU64,

    // ========================================================================
    // Execution Metrics
    // ========================================================================
    /// Executions whose rows were all persisted
    executions_written: AtomicU64,

    /// Executions that ran out of attempts
    executions_exhausted: AtomicU64,

    started_at: Instant,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub pass_count: u64,
    pub failed_pass_count: u64,
    /// Passes after the first for an execution
    pub retry_count: u64,
    pub pass_p50_ms: u64,
    pub pass_p95_ms: u64,
    pub pass_avg_ms: u64,
    pub last_pass_ms: u64,
    pub rows_written: u64,
    pub row_failures: u64,
    pub executions_written: u64,
    pub executions_exhausted: u64,
    pub uptime_secs: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            pass_count: AtomicU64::new(0),
            failed_pass_count: AtomicU64::new(0),
            pass_latencies_ms: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
            last_pass_ms: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            row_failures: AtomicU64::new(0),
            executions_written: AtomicU64::new(0),
            executions_exhausted: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record one finished write pass.
    ///
    /// `written` and `failed` are row outcomes of the pass.
    pub fn record_pass(&self, written: u64, failed: u64, duration_ms: u64) {
        self.pass_count.fetch_add(1, Ordering::Relaxed);
        if failed > 0 {
            self.failed_pass_count.fetch_add(1, Ordering::Relaxed);
        }
        self.rows_written.fetch_add(written, Ordering::Relaxed);
        self.row_failures.fetch_add(failed, Ordering::Relaxed);
        self.last_pass_ms.store(duration_ms, Ordering::Relaxed);

        let mut latencies = self
            .pass_latencies_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if latencies.len() >= LATENCY_WINDOW_SIZE {
            latencies.pop_front();
        }
        latencies.push_back(duration_ms);
    }

    /// Record the end of a full write sequence for one execution.
    pub fn record_execution(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.executions_written
        } else {
            &self.executions_exhausted
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (p50, p95, avg) = {
            let latencies = self
                .pass_latencies_ms
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if latencies.is_empty() {
                (0, 0, 0)
            } else {
                let mut sorted: Vec<u64> = latencies.iter().copied().collect();
                sorted.sort_unstable();

                let len = sorted.len();
                let sum: u64 = sorted.iter().sum();
                (sorted[len * 50 / 100], sorted[len * 95 / 100], sum / len as u64)
            }
        };

        let pass_count = self.pass_count.load(Ordering::Relaxed);
        let executions = self.executions_written.load(Ordering::Relaxed)
            + self.executions_exhausted.load(Ordering::Relaxed);

        MetricsSnapshot {
            pass_count,
            failed_pass_count: self.failed_pass_count.load(Ordering::Relaxed),
            retry_count: pass_count.saturating_sub(executions),
            pass_p50_ms: p50,
            pass_p95_ms: p95,
            pass_avg_ms: avg,
            last_pass_ms: self.last_pass_ms.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            row_failures: self.row_failures.load(Ordering::Relaxed),
            executions_written: self.executions_written.load(Ordering::Relaxed),
            executions_exhausted: self.executions_exhausted.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics_new() {
        let snap = Metrics::new().snapshot();
        assert_eq!(snap.pass_count, 0);
        assert_eq!(snap.retry_count, 0);
        assert_eq!(snap.pass_p50_ms, 0);
        assert_eq!(snap.pass_avg_ms, 0);
        assert_eq!(snap.rows_written, 0);
    }

    #[test]
    fn test_record_pass_counts_rows() {
        let m = Metrics::new();
        m.record_pass(10, 2, 5);
        m.record_pass(12, 0, 7);

        let snap = m.snapshot();
        assert_eq!(snap.pass_count, 2);
        assert_eq!(snap.failed_pass_count, 1);
        assert_eq!(snap.rows_written, 22);
        assert_eq!(snap.row_failures, 2);
        assert_eq!(snap.last_pass_ms, 7);
    }

    #[test]
    fn test_retry_count_derived_from_executions() {
        let m = Metrics::new();
        // First execution: three passes, the last succeeds.
        m.record_pass(0, 4, 1);
        m.record_pass(2, 2, 1);
        m.record_pass(4, 0, 1);
        m.record_execution(true);
        // Second execution: one clean pass.
        m.record_pass(4, 0, 1);
        m.record_execution(true);

        let snap = m.snapshot();
        assert_eq!(snap.retry_count, 2);
        assert_eq!(snap.executions_written, 2);
        assert_eq!(snap.executions_exhausted, 0);
    }

    #[test]
    fn test_percentiles() {
        let m = Metrics::new();
        for ms in 1..=100 {
            m.record_pass(1, 0, ms);
        }

        let snap = m.snapshot();
        assert_eq!(snap.pass_p50_ms, 51);
        assert_eq!(snap.pass_p95_ms, 96);
        assert_eq!(snap.pass_avg_ms, 50);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let m = Metrics::new();
        for _ in 0..LATENCY_WINDOW_SIZE {
            m.record_pass(1, 0, 1_000);
        }
        for _ in 0..LATENCY_WINDOW_SIZE {
            m.record_pass(1, 0, 1);
        }

        let snap = m.snapshot();
        assert_eq!(snap.pass_p95_ms, 1);
        assert_eq!(snap.pass_count, 2 * LATENCY_WINDOW_SIZE as u64);
    }

    #[test]
    fn test_concurrent_recording() {
        let m = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..250 {
                        m.record_pass(1, 0, 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(m.snapshot().rows_written, 1_000);
    }
}
