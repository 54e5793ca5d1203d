//! Job repository: the durable queue with claim-once semantics.
//!
//! Every state transition is a single conditional `UPDATE ... WHERE status = ...`,
//! so concurrent callers race on the store rather than in memory.

use std::time::Duration;

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use pipeline_core::{
    Job, JobId, JobResult, JobStatus, Metadata, NewJob, Priority, QueueCounts,
};
use serde::{Deserialize, Serialize};

use crate::record::{is_write_conflict, millis, millis_ago, millis_from_now, now_millis};
use crate::{Database, DbError};

/// Candidates fetched per claim round.
const CLAIM_CANDIDATES: i64 = 8;

/// Repository for job persistence operations.
#[derive(Debug, Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct JobRecord {
    job_id: String,
    briefing_id: String,
    user_id: String,
    office_id: String,
    priority: Priority,
    #[serde(default)]
    metadata: Metadata,
    status: JobStatus,
    attempts: u32,
    max_attempts: u32,
    #[serde(default)]
    last_error: Option<String>,
    #[serde(default)]
    result: Option<JobResult>,
    #[serde(default)]
    worker_id: Option<String>,
    #[serde(default, with = "ts_milliseconds_option")]
    lease_expires_at: Option<DateTime<Utc>>,
    #[serde(with = "ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn into_job(self) -> Result<Job, DbError> {
        let id = JobId::parse(&self.job_id)
            .map_err(|e| DbError::Serialization(format!("invalid job id {}: {e}", self.job_id)))?;

        Ok(Job {
            id,
            briefing_id: self.briefing_id,
            user_id: self.user_id,
            office_id: self.office_id,
            priority: self.priority,
            metadata: self.metadata,
            status: self.status,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            last_error: self.last_error,
            result: self.result,
            worker_id: self.worker_id,
            lease_expires_at: self.lease_expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Struct for creating jobs. Ownership fields are absent until the first claim.
#[derive(Debug, Serialize)]
struct JobCreate {
    job_id: String,
    briefing_id: String,
    user_id: String,
    office_id: String,
    priority: Priority,
    priority_rank: u8,
    metadata: Metadata,
    status: JobStatus,
    attempts: u32,
    max_attempts: u32,
    #[serde(with = "ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    updated_at: DateTime<Utc>,
}

impl From<&Job> for JobCreate {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            briefing_id: job.briefing_id.clone(),
            user_id: job.user_id.clone(),
            office_id: job.office_id.clone(),
            priority: job.priority,
            priority_rank: job.priority.rank(),
            metadata: job.metadata.clone(),
            status: job.status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Where a failed job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back in the queue for another attempt.
    Requeued,
    /// Terminal failure.
    Failed,
    /// The job was not in progress; nothing changed.
    NotInProgress,
}

/// Jobs touched by one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub requeued: usize,
    pub failed: usize,
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a queued job and return it.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job, DbError> {
        let job = new_job.into_job();
        let content = JobCreate::from(&job);

        let mut response = self
            .db
            .client()
            .query(r#"CREATE type::thing("job", $id) CONTENT $content"#)
            .bind(("id", job.id.to_string()))
            .bind(("content", content))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        let created = records
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Query("Failed to create job".into()))?
            .into_job()?;

        tracing::debug!(job_id = %created.id, briefing_id = %created.briefing_id, priority = %created.priority, "Job enqueued");
        Ok(created)
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        let mut response = self
            .db
            .client()
            .query(r#"SELECT * FROM type::thing("job", $id)"#)
            .bind(("id", id.to_string()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        records
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))?
            .into_job()
    }

    /// Jobs for a briefing, oldest first.
    pub async fn list_for_briefing(&self, briefing_id: &str) -> Result<Vec<Job>, DbError> {
        let mut response = self
            .db
            .client()
            .query("SELECT * FROM job WHERE briefing_id = $briefing_id ORDER BY created_at ASC, job_id ASC")
            .bind(("briefing_id", briefing_id.to_string()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        records.into_iter().map(JobRecord::into_job).collect()
    }

    /// Atomically take the best queued job for `worker_id`.
    ///
    /// Order: priority (high first), then creation time, then id. The claim
    /// increments `attempts`, records the owner and starts a lease of `lease`.
    ///
    /// `Ok(None)` only when no queued job is left. A round whose candidates
    /// all went to other claimers rescans.
    pub async fn claim_next(&self, worker_id: &str, lease: Duration) -> Result<Option<Job>, DbError> {
        loop {
            let candidates = self.queued_candidates().await?;
            if candidates.is_empty() {
                return Ok(None);
            }

            for job_id in candidates {
                if let Some(job) = self.try_claim(&job_id, worker_id, lease).await? {
                    tracing::debug!(job_id = %job.id, worker_id, attempt = job.attempts, "Job claimed");
                    return Ok(Some(job));
                }
            }
            tracing::trace!(worker_id, "Every candidate was taken; rescanning");
        }
    }

    async fn queued_candidates(&self) -> Result<Vec<String>, DbError> {
        #[derive(Deserialize)]
        struct Candidate {
            job_id: String,
        }

        let mut response = self
            .db
            .client()
            .query(
                r#"
                SELECT * FROM job
                WHERE status = "queued"
                ORDER BY priority_rank DESC, created_at ASC, job_id ASC
                LIMIT $limit
                "#,
            )
            .bind(("limit", CLAIM_CANDIDATES))
            .await?;
        let candidates: Vec<Candidate> = response.take(0)?;

        Ok(candidates.into_iter().map(|c| c.job_id).collect())
    }

    /// Compare-and-swap one candidate from queued to in-progress.
    ///
    /// `Ok(None)` means another claimer got there first.
    async fn try_claim(
        &self,
        job_id: &str,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Job>, DbError> {
        let mut response = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing("job", $id) SET
                    status = "in_progress",
                    attempts += 1,
                    worker_id = $worker_id,
                    lease_expires_at = $lease_expires_at,
                    updated_at = $now
                WHERE status = "queued"
                RETURN AFTER
                "#,
            )
            .bind(("id", job_id.to_string()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_expires_at", millis_from_now(lease)))
            .bind(("now", now_millis()))
            .await?;

        match response.take::<Vec<JobRecord>>(0) {
            Ok(records) => records.into_iter().next().map(JobRecord::into_job).transpose(),
            Err(e) if is_write_conflict(&e) => {
                tracing::debug!(job_id, worker_id, error = %e, "Claim lost");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark an in-progress job completed with its result.
    ///
    /// Returns `false` when the job was not in progress (already completed,
    /// failed or re-queued); the stored result is left untouched.
    pub async fn complete(&self, id: JobId, result: &JobResult) -> Result<bool, DbError> {
        let mut response = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing("job", $id) SET
                    status = "completed",
                    result = $result,
                    last_error = NONE,
                    worker_id = NONE,
                    lease_expires_at = NONE,
                    updated_at = $now
                WHERE status = "in_progress"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("result", result.clone()))
            .bind(("now", now_millis()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        let completed = !records.is_empty();
        if !completed {
            tracing::debug!(job_id = %id, "Complete ignored: job not in progress");
        }
        Ok(completed)
    }

    /// Record a failure on an in-progress job.
    ///
    /// A retryable failure goes back to the queue while `attempts < max_attempts`;
    /// anything else is terminal.
    pub async fn fail(&self, id: JobId, error: &str, retryable: bool) -> Result<FailOutcome, DbError> {
        let mut response = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing("job", $id) SET
                    status = IF $retryable AND attempts < max_attempts THEN "queued" ELSE "failed" END,
                    last_error = $error,
                    worker_id = NONE,
                    lease_expires_at = NONE,
                    updated_at = $now
                WHERE status = "in_progress"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("retryable", retryable))
            .bind(("error", error.to_string()))
            .bind(("now", now_millis()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        let outcome = match records.into_iter().next().map(|r| r.status) {
            Some(JobStatus::Queued) => FailOutcome::Requeued,
            Some(_) => FailOutcome::Failed,
            None => FailOutcome::NotInProgress,
        };
        tracing::debug!(job_id = %id, retryable, ?outcome, "Job failure recorded");
        Ok(outcome)
    }

    /// Extend the lease of a job still owned by `worker_id`.
    ///
    /// Returns `false` when the worker no longer owns the job.
    pub async fn renew_lease(&self, id: JobId, worker_id: &str, lease: Duration) -> Result<bool, DbError> {
        let mut response = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing("job", $id) SET
                    lease_expires_at = $lease_expires_at,
                    updated_at = $now
                WHERE status = "in_progress" AND worker_id = $worker_id
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_expires_at", millis_from_now(lease)))
            .bind(("now", now_millis()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        Ok(!records.is_empty())
    }

    /// Take back in-progress jobs whose lease has expired.
    ///
    /// Jobs with attempts left are re-queued, the rest fail terminally.
    pub async fn reap_expired_leases(&self) -> Result<ReapReport, DbError> {
        let mut response = self
            .db
            .client()
            .query(
                r#"
                UPDATE job SET
                    status = IF attempts < max_attempts THEN "queued" ELSE "failed" END,
                    last_error = "lease expired",
                    worker_id = NONE,
                    lease_expires_at = NONE,
                    updated_at = $now
                WHERE status = "in_progress"
                    AND lease_expires_at != NONE
                    AND lease_expires_at < $now
                RETURN AFTER
                "#,
            )
            .bind(("now", now_millis()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        let mut report = ReapReport::default();
        for record in &records {
            match record.status {
                JobStatus::Queued => report.requeued += 1,
                _ => report.failed += 1,
            }
            tracing::warn!(job_id = %record.job_id, status = %record.status, "Reclaimed job with expired lease");
        }
        Ok(report)
    }

    /// Delete terminal jobs not updated within `retention`. Returns the count removed.
    pub async fn cleanup(&self, retention: Duration) -> Result<usize, DbError> {
        #[derive(Deserialize)]
        struct Removed {
            #[allow(dead_code)]
            job_id: String,
        }

        let mut response = self
            .db
            .client()
            .query(
                r#"
                DELETE job
                WHERE status IN ["completed", "failed"] AND updated_at < $cutoff
                RETURN BEFORE
                "#,
            )
            .bind(("cutoff", millis_ago(retention)))
            .await?;
        let removed: Vec<Removed> = response.take(0)?;

        Ok(removed.len())
    }

    /// Job counts per status.
    pub async fn stats(&self) -> Result<QueueCounts, DbError> {
        #[derive(Deserialize)]
        struct StatusCount {
            status: Option<JobStatus>,
            total: i64,
        }

        let mut response = self
            .db
            .client()
            .query("SELECT status, count() AS total FROM job GROUP BY status")
            .await?;
        let counts: Vec<StatusCount> = response.take(0)?;

        let mut stats = QueueCounts::default();
        for count in counts {
            let total = count.total.max(0) as u64;
            match count.status {
                Some(JobStatus::Queued) => stats.queued = total,
                Some(JobStatus::InProgress) => stats.in_progress = total,
                Some(JobStatus::Completed) => stats.completed = total,
                Some(JobStatus::Failed) => stats.failed = total,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Force a job's `updated_at`, used to age jobs for retention checks.
    #[doc(hidden)]
    pub async fn backdate(&self, id: JobId, updated_at: DateTime<Utc>) -> Result<(), DbError> {
        self.db
            .client()
            .query(r#"UPDATE type::thing("job", $id) SET updated_at = $updated_at"#)
            .bind(("id", id.to_string()))
            .bind(("updated_at", millis(updated_at)))
            .await?
            .check()?;
        Ok(())
    }

    /// Force a job's lease expiry, used to simulate a crashed owner.
    #[doc(hidden)]
    pub async fn expire_lease(&self, id: JobId) -> Result<(), DbError> {
        self.db
            .client()
            .query(r#"UPDATE type::thing("job", $id) SET lease_expires_at = $expired WHERE status = "in_progress""#)
            .bind(("id", id.to_string()))
            .bind(("expired", now_millis() - 1_000))
            .await?
            .check()?;
        Ok(())
    }
}
