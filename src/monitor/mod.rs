//! Per-source attempt bookkeeping and the consecutive-failure skip.
//!
//! Workers take an [`AttemptReservation`] before every fetch attempt and
//! settle it with the outcome; the orchestrator reads
//! [`PerformanceMonitor::is_tripped`] before dispatching. A source trips once
//! its consecutive-failure counter reaches the threshold and stays tripped for
//! the rest of the run.
//!
//! Attempts in flight count against the failure budget: a reservation is only
//! granted while `consecutive_failures + in_flight < threshold`, so the
//! attempt that trips a source is always the last one started for it.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::monitor::PerformanceMonitor;
//!
//! let monitor = PerformanceMonitor::new(2);
//! monitor.record_attempt("lite-cnn", false, Duration::from_millis(900));
//! monitor.record_attempt("lite-cnn", false, Duration::from_millis(900));
//! assert!(monitor.is_tripped("lite-cnn"));
//! assert!(!monitor.record_attempt("lite-cnn", true, Duration::from_millis(50)));
//! ```

pub mod history;

pub use history::{DEFAULT_RETENTION_RUNS, HistoryError, MetricsHistory, RunMetricsRow};

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Observed default number of consecutive failures that skips a source.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 2;

/// Counters for one source over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetrics {
    /// Recorded attempts.
    pub attempts: u64,
    /// Successful attempts.
    pub successes: u64,
    /// Failed attempts.
    pub failures: u64,
    /// Mean latency over all recorded attempts.
    pub average_latency_ms: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Whether the source was skipped for the rest of the run.
    pub tripped: bool,
    #[serde(skip)]
    total_latency_ms: u128,
    #[serde(skip)]
    in_flight: u32,
}

impl SourceMetrics {
    /// Mean attempt latency.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        Duration::from_millis(self.average_latency_ms)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn record(&mut self, success: bool, latency: Duration, threshold: u32) {
        self.attempts += 1;
        self.total_latency_ms += latency.as_millis();
        self.average_latency_ms = (self.total_latency_ms / u128::from(self.attempts)) as u64;
        if success {
            self.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failures += 1;
            self.consecutive_failures += 1;
            if self.consecutive_failures >= threshold {
                self.tripped = true;
            }
        }
    }
}

/// End-of-run summary, keyed by source id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorReport {
    /// Consecutive-failure threshold in force.
    pub failure_threshold: u32,
    /// Per-source counters.
    pub sources: BTreeMap<String, SourceMetrics>,
}

/// Thread-safe, run-scoped source metrics.
///
/// Every update happens under the map shard lock for that source, so
/// concurrent workers never lose increments.
#[derive(Debug)]
pub struct PerformanceMonitor {
    failure_threshold: u32,
    sources: DashMap<String, SourceMetrics>,
    settled: Notify,
}

enum Slot {
    Granted,
    Busy,
    Tripped,
}

/// Permission to run one fetch attempt against a source.
///
/// Settle it with [`finish`](Self::finish). Dropping it unsettled releases
/// the slot without recording anything.
#[derive(Debug)]
#[must_use = "an unsettled reservation records nothing"]
pub struct AttemptReservation<'a> {
    monitor: &'a PerformanceMonitor,
    source_id: &'a str,
    open: bool,
}

impl AttemptReservation<'_> {
    /// Records the attempt's outcome and releases the slot.
    pub fn finish(mut self, success: bool, latency: Duration) {
        self.open = false;
        self.monitor.settle(self.source_id, Some((success, latency)));
    }
}

impl Drop for AttemptReservation<'_> {
    fn drop(&mut self) {
        if self.open {
            self.monitor.settle(self.source_id, None);
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl PerformanceMonitor {
    /// Creates a monitor; a threshold of 0 is treated as 1.
    #[must_use]
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            sources: DashMap::new(),
            settled: Notify::new(),
        }
    }

    /// The consecutive-failure threshold.
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Waits for a slot in the source's failure budget.
    ///
    /// Returns `None` once the source is tripped. While other attempts are in
    /// flight and could exhaust the budget, waits for one of them to settle.
    pub async fn reserve_attempt<'a>(
        &'a self,
        source_id: &'a str,
    ) -> Option<AttemptReservation<'a>> {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            match self.try_reserve(source_id) {
                Slot::Granted => {
                    return Some(AttemptReservation {
                        monitor: self,
                        source_id,
                        open: true,
                    });
                }
                Slot::Tripped => return None,
                Slot::Busy => {
                    debug!(source_id, "failure budget in use, waiting for an attempt to settle");
                    settled.await;
                }
            }
        }
    }

    fn try_reserve(&self, source_id: &str) -> Slot {
        let mut metrics = self.sources.entry(source_id.to_string()).or_default();
        if metrics.tripped {
            Slot::Tripped
        } else if metrics.consecutive_failures + metrics.in_flight >= self.failure_threshold {
            Slot::Busy
        } else {
            metrics.in_flight += 1;
            Slot::Granted
        }
    }

    fn settle(&self, source_id: &str, outcome: Option<(bool, Duration)>) {
        if let Some(mut metrics) = self.sources.get_mut(source_id) {
            metrics.in_flight = metrics.in_flight.saturating_sub(1);
            if let Some((success, latency)) = outcome {
                self.apply(source_id, &mut metrics, success, latency);
            }
        }
        self.settled.notify_waiters();
    }

    /// Records one attempt made without a reservation, such as a listing
    /// request. Returns false, recording nothing, when the source is already
    /// tripped.
    pub fn record_attempt(&self, source_id: &str, success: bool, latency: Duration) -> bool {
        {
            let mut metrics = self.sources.entry(source_id.to_string()).or_default();
            if metrics.tripped {
                debug!(source_id, "ignoring attempt for skipped source");
                return false;
            }
            self.apply(source_id, &mut metrics, success, latency);
        }
        self.settled.notify_waiters();
        true
    }

    fn apply(&self, source_id: &str, metrics: &mut SourceMetrics, success: bool, latency: Duration) {
        metrics.record(success, latency, self.failure_threshold);
        if metrics.tripped {
            warn!(
                source_id,
                consecutive_failures = metrics.consecutive_failures,
                "source reached failure threshold, skipping for the rest of the run"
            );
        }
    }

    /// Failures since the source's last success.
    #[must_use]
    pub fn consecutive_failures(&self, source_id: &str) -> u32 {
        self.sources
            .get(source_id)
            .map_or(0, |m| m.consecutive_failures)
    }

    /// Whether the source is skipped for the rest of the run.
    #[must_use]
    pub fn is_tripped(&self, source_id: &str) -> bool {
        self.sources.get(source_id).is_some_and(|m| m.tripped)
    }

    /// Snapshot of one source's counters.
    #[must_use]
    pub fn metrics(&self, source_id: &str) -> Option<SourceMetrics> {
        self.sources.get(source_id).map(|m| m.clone())
    }

    /// Snapshot of every source's counters.
    #[must_use]
    pub fn report(&self) -> MonitorReport {
        MonitorReport {
            failure_threshold: self.failure_threshold,
            sources: self
                .sources
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }
}
