//! Cross-run persistence of per-source metrics.
//!
//! Each run appends one row per source to a SQLite file. The store keeps the
//! newest [`DEFAULT_RETENTION_RUNS`] rows per source and prunes older ones
//! whenever a run is recorded.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use harvester_core::monitor::{MetricsHistory, PerformanceMonitor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let history = MetricsHistory::open(Path::new("harvester-history.db")).await?;
//! history.record_run("20240101T000000.000Z", &PerformanceMonitor::default().report()).await?;
//! history.close().await;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::MonitorReport;

/// Rows kept per source unless overridden with
/// [`MetricsHistory::with_retention`].
pub const DEFAULT_RETENTION_RUNS: u32 = 200;

/// Flushes are short and serialized by SQLite anyway.
const MAX_CONNECTIONS: u32 = 2;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the history store.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// The history file could not be opened or created.
    #[error("cannot open metrics history {path}: {source}")]
    Open {
        /// History file.
        path: String,
        /// Underlying error.
        #[source]
        source: sqlx::Error,
    },

    /// The schema could not be brought up to date.
    #[error("cannot migrate metrics history: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A read or write failed.
    #[error("metrics history query failed: {0}")]
    Query(#[from] sqlx::Error),
}

impl HistoryError {
    fn open(path: &Path, source: sqlx::Error) -> Self {
        Self::Open {
            path: path.display().to_string(),
            source,
        }
    }
}

/// One source's metrics from one past run.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RunMetricsRow {
    /// Run identifier.
    pub run_id: String,
    /// Source id.
    pub source_id: String,
    /// Recorded attempts.
    pub attempts: i64,
    /// Successful attempts.
    pub successes: i64,
    /// Failed attempts.
    pub failures: i64,
    /// Mean latency in milliseconds.
    pub average_latency_ms: i64,
    /// Failures since the last success at run end.
    pub consecutive_failures: i64,
    /// Whether the source was skipped during the run.
    pub skipped: bool,
    /// RFC 3339 timestamp of the flush.
    pub recorded_at: String,
}

impl RunMetricsRow {
    /// Successes over attempts, or `None` without attempts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.successes as f64 / self.attempts as f64)
    }
}

/// SQLite-backed store of end-of-run metrics.
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    pool: SqlitePool,
    retention_runs: u32,
}

impl MetricsHistory {
    /// Opens the history file at `path`, creating it if needed, in WAL mode
    /// with the schema migrated.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Open`] if the file cannot be opened and
    /// [`HistoryError::Migration`] if the schema cannot be applied.
    #[instrument(fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, HistoryError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| HistoryError::open(path, e))?;
        Self::from_pool(pool).await
    }

    /// Opens a private in-memory history, discarded on close.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if SQLite cannot be initialised.
    pub async fn open_in_memory() -> Result<Self, HistoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await
            .map_err(|e| HistoryError::open(Path::new(":memory:"), e))?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, HistoryError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            retention_runs: DEFAULT_RETENTION_RUNS,
        })
    }

    /// Keeps at most `runs` rows per source (at least 1).
    #[must_use]
    pub fn with_retention(mut self, runs: u32) -> Self {
        self.retention_runs = runs.max(1);
        self
    }

    /// Closes the store. Pending writes are flushed by SQLite.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Persists every source in `report` under `run_id`, then prunes rows
    /// past the retention limit, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Query`] if a write fails; nothing is stored in
    /// that case.
    #[instrument(skip(self, report), fields(sources = report.sources.len()))]
    pub async fn record_run(
        &self,
        run_id: &str,
        report: &MonitorReport,
    ) -> Result<usize, HistoryError> {
        let mut tx = self.pool.begin().await?;
        for (source_id, metrics) in &report.sources {
            sqlx::query(
                "INSERT INTO source_run_metrics
                    (run_id, source_id, attempts, successes, failures,
                     average_latency_ms, consecutive_failures, skipped)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(run_id)
            .bind(source_id)
            .bind(i64::try_from(metrics.attempts).unwrap_or(i64::MAX))
            .bind(i64::try_from(metrics.successes).unwrap_or(i64::MAX))
            .bind(i64::try_from(metrics.failures).unwrap_or(i64::MAX))
            .bind(i64::try_from(metrics.average_latency_ms).unwrap_or(i64::MAX))
            .bind(i64::from(metrics.consecutive_failures))
            .bind(metrics.tripped)
            .execute(&mut *tx)
            .await?;

            let pruned = sqlx::query(
                "DELETE FROM source_run_metrics
                 WHERE source_id = ?
                   AND id NOT IN (
                       SELECT id FROM source_run_metrics
                       WHERE source_id = ?
                       ORDER BY recorded_at DESC, id DESC
                       LIMIT ?)",
            )
            .bind(source_id)
            .bind(source_id)
            .bind(i64::from(self.retention_runs))
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if pruned > 0 {
                debug!(source_id = %source_id, pruned, "pruned old history rows");
            }
        }
        tx.commit().await?;
        info!(run_id, "flushed run metrics");
        Ok(report.sources.len())
    }

    /// The last `limit` runs for `source_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Query`] if the query fails.
    #[instrument(skip(self))]
    pub async fn recent(
        &self,
        source_id: &str,
        limit: u32,
    ) -> Result<Vec<RunMetricsRow>, HistoryError> {
        let rows = sqlx::query_as::<_, RunMetricsRow>(
            "SELECT run_id, source_id, attempts, successes, failures, average_latency_ms,
                    consecutive_failures, skipped, recorded_at
             FROM source_run_metrics
             WHERE source_id = ?
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?",
        )
        .bind(source_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Success rate over the last `limit` runs combined.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Query`] if the query fails.
    pub async fn success_trend(
        &self,
        source_id: &str,
        limit: u32,
    ) -> Result<Option<f64>, HistoryError> {
        let rows = self.recent(source_id, limit).await?;
        let attempts: i64 = rows.iter().map(|r| r.attempts).sum();
        let successes: i64 = rows.iter().map(|r| r.successes).sum();
        #[allow(clippy::cast_precision_loss)]
        Ok((attempts > 0).then(|| successes as f64 / attempts as f64))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::monitor::PerformanceMonitor;

    async fn history() -> MetricsHistory {
        MetricsHistory::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let history = history().await;
        let monitor = PerformanceMonitor::default();
        monitor.record_attempt("lite-cnn", true, Duration::from_millis(200));
        monitor.record_attempt("npr-text", false, Duration::from_millis(50));
        monitor.record_attempt("npr-text", false, Duration::from_millis(50));

        let stored = history.record_run("run-1", &monitor.report()).await.unwrap();
        assert_eq!(stored, 2);

        let rows = history.recent("npr-text", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].failures, 2);
        assert!(rows[0].skipped);
        assert_eq!(rows[0].success_rate(), Some(0.0));
    }

    #[tokio::test]
    async fn test_recent_newest_first_and_limited() {
        let history = history().await;
        for (run, success) in [("r1", true), ("r2", false), ("r3", true)] {
            let monitor = PerformanceMonitor::default();
            monitor.record_attempt("hn", success, Duration::from_millis(10));
            history.record_run(run, &monitor.report()).await.unwrap();
        }

        let rows = history.recent("hn", 2).await.unwrap();
        let runs: Vec<_> = rows.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(runs, vec!["r3", "r2"]);

        let trend = history.success_trend("hn", 3).await.unwrap().unwrap();
        assert!((trend - 2.0 / 3.0).abs() < 1e-9);
        assert!(history.success_trend("unknown", 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_run_is_rejected_atomically() {
        let history = history().await;
        let monitor = PerformanceMonitor::default();
        monitor.record_attempt("a", true, Duration::ZERO);
        history.record_run("r1", &monitor.report()).await.unwrap();
        assert!(history.record_run("r1", &monitor.report()).await.is_err());
        assert_eq!(history.recent("a", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retention_keeps_newest_rows_per_source() {
        let history = history().await.with_retention(2);
        for run in ["r1", "r2", "r3"] {
            let monitor = PerformanceMonitor::default();
            monitor.record_attempt("hn", true, Duration::ZERO);
            monitor.record_attempt("npr-text", true, Duration::ZERO);
            history.record_run(run, &monitor.report()).await.unwrap();
        }

        let runs: Vec<_> = history
            .recent("hn", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.run_id)
            .collect();
        assert_eq!(runs, vec!["r3", "r2"]);
        assert_eq!(history.recent("npr-text", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_open_file_uses_wal_and_reopens() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("history.db");

        let history = MetricsHistory::open(&path).await.unwrap();
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&history.pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        let monitor = PerformanceMonitor::default();
        monitor.record_attempt("hn", true, Duration::ZERO);
        history.record_run("r1", &monitor.report()).await.unwrap();
        history.close().await;

        let reopened = MetricsHistory::open(&path).await.unwrap();
        assert_eq!(reopened.recent("hn", 5).await.unwrap().len(), 1);
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_open_unwritable_path_reports_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("missing").join("history.db");
        let err = MetricsHistory::open(&path).await.unwrap_err();
        assert!(matches!(err, HistoryError::Open { .. }));
        assert!(err.to_string().contains("history.db"));
    }
}
