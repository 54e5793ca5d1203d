#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashSet;
use std::error::Error;
use std::time::Duration;

use chrono::Utc;
use db::DbError;
use db::repositories::{FailOutcome, JobRepository};
use pipeline_core::{JobId, JobResult, JobStatus, Priority};

const LEASE: Duration = Duration::from_secs(60);

#[tokio::test]
async fn enqueue_and_get() -> Result<(), Box<dyn Error>> {
    let jobs = JobRepository::new(common::setup_db().await?);

    let job = jobs
        .enqueue(common::job_for("b-1").with_metadata("source", "briefing_completed"))
        .await?;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 0);

    let loaded = jobs.get(job.id).await?;
    assert_eq!(loaded.id, job.id);
    assert_eq!(loaded.briefing_id, "b-1");
    assert_eq!(loaded.metadata["source"], "briefing_completed");
    assert_eq!(loaded.max_attempts, 3);
    assert!(loaded.worker_id.is_none());

    let missing = jobs.get(JobId::new()).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn claim_orders_by_priority_then_age() -> Result<(), Box<dyn Error>> {
    let jobs = JobRepository::new(common::setup_db().await?);

    let low = jobs.enqueue(common::job_with_priority("low", Priority::Low)).await?;
    let normal_first = jobs.enqueue(common::job_for("normal-1")).await?;
    let high = jobs.enqueue(common::job_with_priority("high", Priority::High)).await?;
    let normal_second = jobs.enqueue(common::job_for("normal-2")).await?;

    let mut order = Vec::new();
    while let Some(job) = jobs.claim_next("w-1", LEASE).await? {
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.worker_id.as_deref(), Some("w-1"));
        assert!(job.lease_expires_at.is_some_and(|at| at > Utc::now()));
        order.push(job.id);
    }

    assert_eq!(order, vec![high.id, normal_first.id, normal_second.id, low.id]);
    Ok(())
}

#[tokio::test]
async fn concurrent_claims_never_share_a_job() -> Result<(), Box<dyn Error>> {
    let jobs = JobRepository::new(common::setup_db().await?);
    for i in 0..20 {
        jobs.enqueue(common::job_for(&format!("b-{i}"))).await?;
    }

    let mut handles = Vec::new();
    for w in 0..6 {
        let jobs = jobs.clone();
        handles.push(tokio::spawn(async move {
            let worker_id = format!("w-{w}");
            let mut claimed = Vec::new();
            while let Ok(Some(job)) = jobs.claim_next(&worker_id, LEASE).await {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await? {
            assert!(seen.insert(id), "job {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 20);

    let stats = jobs.stats().await?;
    assert_eq!(stats.in_progress, 20);
    assert_eq!(stats.queued, 0);
    Ok(())
}

#[tokio::test]
async fn contended_claims_only_come_back_empty_when_the_queue_is() -> Result<(), Box<dyn Error>> {
    let jobs = JobRepository::new(common::setup_db().await?);
    for i in 0..16 {
        jobs.enqueue(common::job_for(&format!("b-{i}"))).await?;
    }

    let mut handles = Vec::new();
    for w in 0..16 {
        let jobs = jobs.clone();
        handles.push(tokio::spawn(async move {
            jobs.claim_next(&format!("w-{w}"), LEASE).await
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let job = handle.await??.ok_or("claim came back empty with jobs queued")?;
        assert!(seen.insert(job.id), "job {} claimed twice", job.id);
    }
    assert_eq!(seen.len(), 16);
    assert!(jobs.claim_next("w-late", LEASE).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn complete_is_idempotent() -> Result<(), Box<dyn Error>> {
    let jobs = JobRepository::new(common::setup_db().await?);
    jobs.enqueue(common::job_for("b-1")).await?;
    let job = jobs.claim_next("w-1", LEASE).await?.ok_or("nothing claimed")?;

    assert!(jobs.complete(job.id, &JobResult::new("budget-1", 40)).await?);
    assert!(!jobs.complete(job.id, &JobResult::new("budget-2", 90)).await?);

    let stored = jobs.get(job.id).await?;
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.result, Some(JobResult::new("budget-1", 40)));
    assert!(stored.worker_id.is_none());
    assert!(stored.lease_expires_at.is_none());
    Ok(())
}

#[tokio::test]
async fn retryable_failures_stop_at_the_cap() -> Result<(), Box<dyn Error>> {
    let jobs = JobRepository::new(common::setup_db().await?);
    let job = jobs.enqueue(common::job_for("b-1").with_max_attempts(3)).await?;

    for attempt in 1..=3 {
        let claimed = jobs.claim_next("w-1", LEASE).await?.ok_or("nothing claimed")?;
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.attempts, attempt);

        let outcome = jobs.fail(job.id, "analysis timed out", true).await?;
        let expected = if attempt < 3 {
            FailOutcome::Requeued
        } else {
            FailOutcome::Failed
        };
        assert_eq!(outcome, expected);
    }

    let stored = jobs.get(job.id).await?;
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.attempts, 3);
    assert_eq!(stored.last_error.as_deref(), Some("analysis timed out"));
    assert!(jobs.claim_next("w-1", LEASE).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn permanent_failure_is_terminal_on_first_attempt() -> Result<(), Box<dyn Error>> {
    let jobs = JobRepository::new(common::setup_db().await?);
    let job = jobs.enqueue(common::job_for("missing")).await?;
    jobs.claim_next("w-1", LEASE).await?;

    assert_eq!(jobs.fail(job.id, "briefing missing not found", false).await?, FailOutcome::Failed);
    assert_eq!(jobs.fail(job.id, "again", true).await?, FailOutcome::NotInProgress);

    let stored = jobs.get(job.id).await?;
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.attempts, 1);
    Ok(())
}

#[tokio::test]
async fn expired_leases_are_reclaimed() -> Result<(), Box<dyn Error>> {
    let jobs = JobRepository::new(common::setup_db().await?);
    let retryable = jobs.enqueue(common::job_for("b-1")).await?;
    let exhausted = jobs.enqueue(common::job_for("b-2").with_max_attempts(1)).await?;
    let healthy = jobs.enqueue(common::job_for("b-3")).await?;

    for _ in 0..3 {
        jobs.claim_next("w-crashed", LEASE).await?;
    }
    jobs.expire_lease(retryable.id).await?;
    jobs.expire_lease(exhausted.id).await?;

    // Only the owner can renew.
    assert!(!jobs.renew_lease(healthy.id, "w-other", LEASE).await?);
    assert!(jobs.renew_lease(healthy.id, "w-crashed", LEASE).await?);

    let report = jobs.reap_expired_leases().await?;
    assert_eq!(report.requeued, 1);
    assert_eq!(report.failed, 1);

    assert_eq!(jobs.get(retryable.id).await?.status, JobStatus::Queued);
    assert_eq!(jobs.get(exhausted.id).await?.status, JobStatus::Failed);
    assert_eq!(jobs.get(healthy.id).await?.status, JobStatus::InProgress);

    let reclaimed = jobs.claim_next("w-2", LEASE).await?.ok_or("nothing claimed")?;
    assert_eq!(reclaimed.id, retryable.id);
    assert_eq!(reclaimed.attempts, 2);
    Ok(())
}

#[tokio::test]
async fn cleanup_removes_only_old_terminal_jobs() -> Result<(), Box<dyn Error>> {
    let jobs = JobRepository::new(common::setup_db().await?);
    let old = jobs.enqueue(common::job_for("old")).await?;
    let recent = jobs.enqueue(common::job_for("recent")).await?;
    let waiting = jobs.enqueue(common::job_for("waiting")).await?;

    jobs.claim_next("w-1", LEASE).await?;
    jobs.claim_next("w-1", LEASE).await?;
    jobs.complete(old.id, &JobResult::new("budget-old", 10)).await?;
    jobs.fail(recent.id, "boom", false).await?;

    let ten_days_ago = Utc::now() - chrono::Duration::days(10);
    jobs.backdate(old.id, ten_days_ago).await?;
    jobs.backdate(waiting.id, ten_days_ago).await?;

    let removed = jobs.cleanup(Duration::from_secs(7 * 24 * 3600)).await?;
    assert_eq!(removed, 1);
    assert!(matches!(jobs.get(old.id).await, Err(DbError::NotFound(_))));
    assert_eq!(jobs.get(recent.id).await?.status, JobStatus::Failed);
    assert_eq!(jobs.get(waiting.id).await?.status, JobStatus::Queued);
    Ok(())
}

#[tokio::test]
async fn stats_counts_each_status() -> Result<(), Box<dyn Error>> {
    let jobs = JobRepository::new(common::setup_db().await?);
    assert_eq!(jobs.stats().await?.active(), 0);

    for i in 0..4 {
        jobs.enqueue(common::job_for(&format!("b-{i}"))).await?;
    }
    let a = jobs.claim_next("w-1", LEASE).await?.ok_or("nothing claimed")?;
    let b = jobs.claim_next("w-1", LEASE).await?.ok_or("nothing claimed")?;
    jobs.claim_next("w-1", LEASE).await?;
    jobs.complete(a.id, &JobResult::new("budget-a", 5)).await?;
    jobs.fail(b.id, "boom", false).await?;

    let stats = jobs.stats().await?;
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.in_progress, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.success_rate(), Some(50.0));
    Ok(())
}
