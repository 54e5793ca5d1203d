//! Statistics for workers, the job queue and the worker pool.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// In-memory counters of one worker instance. Reset when the worker restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker_id: String,
    pub processed_jobs: u64,
    pub successful_jobs: u64,
    pub failed_jobs: u64,
    /// Running mean over every processed item, in milliseconds.
    pub average_processing_time_ms: f64,
    pub start_time: DateTime<Utc>,
}

impl WorkerStats {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            processed_jobs: 0,
            successful_jobs: 0,
            failed_jobs: 0,
            average_processing_time_ms: 0.0,
            start_time: Utc::now(),
        }
    }

    pub fn record_success(&mut self, elapsed: Duration) {
        self.successful_jobs += 1;
        self.record(elapsed);
    }

    pub fn record_failure(&mut self, elapsed: Duration) {
        self.failed_jobs += 1;
        self.record(elapsed);
    }

    fn record(&mut self, elapsed: Duration) {
        self.processed_jobs += 1;
        let sample = elapsed.as_secs_f64() * 1000.0;
        // Incremental mean: no sample history is kept.
        self.average_processing_time_ms +=
            (sample - self.average_processing_time_ms) / self.processed_jobs as f64;
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueCounts {
    pub queued: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueCounts {
    /// Jobs not yet finished (queued + in progress).
    pub fn active(&self) -> u64 {
        self.queued + self.in_progress
    }

    /// Jobs in a terminal state.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}

/// Snapshot of the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub running: bool,
    pub budget_workers: Vec<WorkerStats>,
    pub notification_worker: Option<WorkerStats>,
    pub queue: QueueCounts,
}

impl PoolStats {
    /// Earliest start time across all workers.
    pub fn earliest_start(&self) -> Option<DateTime<Utc>> {
        self.budget_workers
            .iter()
            .chain(self.notification_worker.iter())
            .map(|w| w.start_time)
            .min()
    }
}

/// Pool snapshot with derived totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullPoolStats {
    #[serde(flatten)]
    pub pool: PoolStats,
    pub uptime_secs: u64,
    pub total_processed: u64,
    pub total_successful: u64,
    pub total_failed: u64,
}

impl FullPoolStats {
    pub fn from_pool(pool: PoolStats, now: DateTime<Utc>) -> Self {
        let uptime_secs = pool
            .earliest_start()
            .map(|start| (now - start).num_seconds().max(0) as u64)
            .unwrap_or(0);
        let (total_processed, total_successful, total_failed) = pool
            .budget_workers
            .iter()
            .fold((0, 0, 0), |(p, s, f), w| {
                (p + w.processed_jobs, s + w.successful_jobs, f + w.failed_jobs)
            });

        Self {
            pool,
            uptime_secs,
            total_processed,
            total_successful,
            total_failed,
        }
    }
}
