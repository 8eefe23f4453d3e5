//! Batch write engine
//!
//! Persists the full row sequence of one execution:
//!
//! 1. Rows are split into chunks of `chunk_size`.
//! 2. Every row of a chunk is written concurrently; the chunk is joined
//!    before the next one starts.
//! 3. A pass succeeds only if every row write in it succeeded.
//! 4. A failed pass sleeps `retry_backoff`, then rewrites every row with the
//!    same row ids. Rows that already landed are overwritten in place.
//! 5. After `max_attempts` failed passes the execution fails with
//!    `WriteFailed`. Nothing is rolled back.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;
use uuid::Uuid;

use crate::codec::encode_flat_row;
use crate::config::StoreConfig;
use crate::error::{MatchupError, Result};
use crate::metrics::Metrics;
use crate::model::FlatRow;
use crate::schema::Row;
use crate::session::{SessionHandle, StoreSession};

/// Outcome of a successful `write_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub rows: usize,
    /// Passes it took, 1 when nothing had to be retried.
    pub attempts: u32,
    /// Chunks per pass.
    pub chunks: usize,
}

/// Row outcomes folded over a chunk or a whole pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ChunkOutcome {
    written: usize,
    failed: usize,
}

impl ChunkOutcome {
    fn absorb(&mut self, other: ChunkOutcome) {
        self.written += other.written;
        self.failed += other.failed;
    }

    fn is_success(&self) -> bool {
        self.failed == 0
    }
}

pub struct BatchWriter {
    chunk_size: usize,
    max_attempts: u32,
    retry_backoff: Duration,
    row_timeout: Option<Duration>,
    metrics: Option<Arc<Metrics>>,
}

impl BatchWriter {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunk_size: config.chunk_size,
            max_attempts: config.max_attempts,
            retry_backoff: config.retry_backoff(),
            row_timeout: config.row_timeout(),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Write every row of `execution_id`, retrying whole passes on failure.
    pub async fn write_all(
        &self,
        handle: &SessionHandle,
        execution_id: Uuid,
        rows: &[FlatRow],
    ) -> Result<WriteReport> {
        // Encoded once; every pass writes the same rows with the same ids.
        let encoded: Vec<Row> = rows.iter().map(encode_flat_row).collect();
        let chunks = encoded.len().div_ceil(self.chunk_size);
        let session = handle.session();

        for attempt in 1..=self.max_attempts {
            tracing::info!(
                execution_id = %execution_id,
                rows = encoded.len(),
                chunks,
                attempt,
                "writing result rows"
            );

            let started = Instant::now();
            let outcome = self.write_pass(session, execution_id, &encoded).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if let Some(metrics) = &self.metrics {
                metrics.record_pass(outcome.written as u64, outcome.failed as u64, elapsed_ms);
            }

            if outcome.is_success() {
                if let Some(metrics) = &self.metrics {
                    metrics.record_execution(true);
                }
                tracing::info!(
                    execution_id = %execution_id,
                    rows = encoded.len(),
                    attempt,
                    elapsed_ms,
                    "result rows written"
                );
                return Ok(WriteReport {
                    rows: encoded.len(),
                    attempts: attempt,
                    chunks,
                });
            }

            if attempt < self.max_attempts {
                tracing::warn!(
                    execution_id = %execution_id,
                    failed = outcome.failed,
                    rows = encoded.len(),
                    attempt,
                    backoff_ms = self.retry_backoff.as_millis() as u64,
                    "write pass failed, retrying"
                );
                tokio::time::sleep(self.retry_backoff).await;
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_execution(false);
        }
        tracing::error!(
            execution_id = %execution_id,
            rows = encoded.len(),
            attempts = self.max_attempts,
            "giving up on result rows"
        );
        Err(MatchupError::WriteFailed {
            execution_id,
            rows: encoded.len(),
            attempts: self.max_attempts,
        })
    }

    async fn write_pass(
        &self,
        session: &dyn StoreSession,
        execution_id: Uuid,
        rows: &[Row],
    ) -> ChunkOutcome {
        let total = rows.len();
        let mut outcome = ChunkOutcome::default();

        for (index, chunk) in rows.chunks(self.chunk_size).enumerate() {
            outcome.absorb(self.write_chunk(session, chunk).await);

            let done = outcome.written + outcome.failed;
            tracing::debug!(
                execution_id = %execution_id,
                chunk = index,
                done,
                total,
                percent = progress_percent(done, total),
                "chunk written"
            );
        }

        outcome
    }

    async fn write_chunk(&self, session: &dyn StoreSession, chunk: &[Row]) -> ChunkOutcome {
        let results = join_all(chunk.iter().map(|row| self.write_row(session, row))).await;

        results
            .into_iter()
            .fold(ChunkOutcome::default(), |mut acc, result| {
                match result {
                    Ok(()) => acc.written += 1,
                    Err(e) => {
                        tracing::debug!(error = %e, "row write failed");
                        acc.failed += 1;
                    }
                }
                acc
            })
    }

    async fn write_row(&self, session: &dyn StoreSession, row: &Row) -> Result<()> {
        match self.row_timeout {
            Some(limit) => tokio::time::timeout(limit, session.insert_data_row(row))
                .await
                .map_err(|_| MatchupError::Timeout(limit.as_millis() as u64))?,
            None => session.insert_data_row(row).await,
        }
    }
}

fn progress_percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    done as f64 * 100.0 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten;
    use crate::memory::MemoryStore;
    use crate::model::MatchPoint;
    use chrono::{TimeZone, Utc};

    fn rows(execution_id: Uuid, count: usize) -> Vec<FlatRow> {
        let time = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let points: Vec<MatchPoint> = (0..count)
            .map(|i| MatchPoint::new(format!("p{}", i), 0.0, 0.0, "A", time))
            .collect();
        flatten(execution_id, &points).unwrap().rows
    }

    fn fast_config() -> StoreConfig {
        StoreConfig::default().with_retry_backoff(Duration::from_millis(10))
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let err = BatchWriter::new(&StoreConfig::default().with_chunk_size(0)).err();
        assert!(matches!(err, Some(MatchupError::Config(_))));
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 0), 100.0);
        assert_eq!(progress_percent(1, 4), 25.0);
        assert_eq!(progress_percent(4, 4), 100.0);
    }

    #[test]
    fn test_chunk_outcome_absorb() {
        let mut total = ChunkOutcome::default();
        total.absorb(ChunkOutcome { written: 3, failed: 0 });
        assert!(total.is_success());
        total.absorb(ChunkOutcome { written: 1, failed: 2 });
        assert_eq!(total, ChunkOutcome { written: 4, failed: 2 });
        assert!(!total.is_success());
    }

    #[tokio::test]
    async fn test_empty_rows_succeed_without_writes() {
        let store = Arc::new(MemoryStore::new());
        let handle = SessionHandle::acquire(store.clone()).unwrap();
        let writer = BatchWriter::new(&fast_config()).unwrap();

        let report = writer.write_all(&handle, Uuid::new_v4(), &[]).await.unwrap();
        assert_eq!(report, WriteReport { rows: 0, attempts: 1, chunks: 0 });
        assert_eq!(store.data_write_count(), 0);
    }

    #[tokio::test]
    async fn test_report_counts_chunks() {
        let store = Arc::new(MemoryStore::new());
        let handle = SessionHandle::acquire(store.clone()).unwrap();
        let writer = BatchWriter::new(&fast_config().with_chunk_size(4)).unwrap();
        let exec = Uuid::new_v4();

        let report = writer.write_all(&handle, exec, &rows(exec, 10)).await.unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.attempts, 1);
        assert_eq!(store.data_rows_for(exec).len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_row_timeout_counts_as_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_write_delay(Duration::from_millis(500));
        let handle = SessionHandle::acquire(store.clone()).unwrap();
        let config = fast_config()
            .with_max_attempts(2)
            .with_row_timeout(Duration::from_millis(50));
        let writer = BatchWriter::new(&config).unwrap();
        let exec = Uuid::new_v4();

        let err = writer.write_all(&handle, exec, &rows(exec, 3)).await.unwrap_err();
        assert!(matches!(err, MatchupError::WriteFailed { attempts: 2, rows: 3, .. }));
        assert_eq!(store.data_row_count(), 0);
    }

    #[tokio::test]
    async fn test_metrics_recorded() {
        let store = Arc::new(MemoryStore::new());
        store.fail_first_writes(1);
        let handle = SessionHandle::acquire(store.clone()).unwrap();
        let metrics = Arc::new(Metrics::new());
        let writer = BatchWriter::new(&fast_config())
            .unwrap()
            .with_metrics(metrics.clone());
        let exec = Uuid::new_v4();

        let report = writer.write_all(&handle, exec, &rows(exec, 5)).await.unwrap();
        assert_eq!(report.attempts, 2);

        let snap = metrics.snapshot();
        assert_eq!(snap.pass_count, 2);
        assert_eq!(snap.failed_pass_count, 1);
        assert_eq!(snap.retry_count, 1);
        assert_eq!(snap.rows_written, 9);
        assert_eq!(snap.row_failures, 1);
        assert_eq!(snap.executions_written, 1);
    }
}
