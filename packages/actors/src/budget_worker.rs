//! Budget generation worker.
//!
//! [`BudgetJobProcessor`] turns one claimed job into one budget. The
//! [`BudgetWorker`] actor drives it in a loop with self-scheduled `Poll`
//! messages: immediately after a job, after `idle_interval` when the queue
//! is empty and after `error_backoff` when the store is unavailable.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use db::DbError;
use db::repositories::{FailOutcome, JobRepository};
use futures_util::FutureExt;
use pipeline_core::{Job, JobId, JobResult, NewBudget, NewNotification, WorkerStats};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::BudgetWorkerConfig;
use crate::deps::PipelineDeps;
use crate::error::JobError;
use crate::messages::BudgetWorkerMessage;

/// What happened to a processed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    Completed {
        job_id: JobId,
        budget_id: String,
        /// Closed on a budget that already existed.
        reused_existing: bool,
    },
    Failed {
        job_id: JobId,
        error: String,
        outcome: FailOutcome,
    },
}

/// Where the budget closing a job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BudgetSource {
    /// Created by this attempt.
    Created,
    /// Created by an earlier attempt of the pipeline that did not finish.
    Resumed,
    /// The briefing had its budget before this job ran.
    Existing,
}

/// Output of the generation steps for one job.
struct Generated {
    budget_id: String,
    source: BudgetSource,
    project_name: String,
}

impl Generated {
    fn reused_existing(&self) -> bool {
        self.source != BudgetSource::Created
    }

    /// Existing budgets were announced when they were made.
    fn announce(&self) -> bool {
        self.source != BudgetSource::Existing
    }
}

/// Processes claimed jobs for one worker id.
pub struct BudgetJobProcessor {
    worker_id: String,
    deps: PipelineDeps,
    config: BudgetWorkerConfig,
    stats: watch::Sender<WorkerStats>,
}

impl BudgetJobProcessor {
    pub fn new(worker_id: impl Into<String>, deps: PipelineDeps, config: BudgetWorkerConfig) -> Self {
        let worker_id = worker_id.into();
        let (stats, _) = watch::channel(WorkerStats::new(worker_id.clone()));
        Self {
            worker_id,
            deps,
            config,
            stats,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn config(&self) -> &BudgetWorkerConfig {
        &self.config
    }

    /// Current counters.
    pub fn stats(&self) -> WorkerStats {
        self.stats.borrow().clone()
    }

    /// Read-only view of the counters, updated after every job.
    pub fn subscribe_stats(&self) -> watch::Receiver<WorkerStats> {
        self.stats.subscribe()
    }

    /// Claim and process one job.
    ///
    /// `Ok(None)` when the queue had nothing eligible. Errors are store
    /// failures outside any job; job failures are recorded on the job.
    pub async fn process_next(&self) -> Result<Option<JobReport>, DbError> {
        let Some(job) = self
            .deps
            .jobs
            .claim_next(&self.worker_id, self.config.lease_duration)
            .await?
        else {
            return Ok(None);
        };

        let span = tracing::info_span!(
            "budget_job",
            worker_id = %self.worker_id,
            job_id = %job.id,
            briefing_id = %job.briefing_id,
            attempt = job.attempts,
        );
        self.process(job).instrument(span).await.map(Some)
    }

    async fn process(&self, job: Job) -> Result<JobReport, DbError> {
        let started = Instant::now();
        tracing::info!("Processing budget job");

        let heartbeat = spawn_heartbeat(
            self.deps.jobs.clone(),
            job.id,
            self.worker_id.clone(),
            self.config.lease_duration,
            self.config.heartbeat_interval(),
        );

        let attempt = AssertUnwindSafe(self.generate(&job)).catch_unwind();
        let result = match tokio::time::timeout(self.config.job_timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(JobError::Timeout(self.config.job_timeout)),
        };
        heartbeat.abort();

        let elapsed = started.elapsed();
        match result {
            Ok(generated) => self.finish_success(&job, generated, elapsed).await,
            Err(err) => self.finish_failure(&job, err, elapsed).await,
        }
    }

    /// Briefing to persisted budget, including the generated trigger.
    async fn generate(&self, job: &Job) -> Result<Generated, JobError> {
        let deps = &self.deps;

        let briefing = deps
            .briefings
            .get_briefing(&job.briefing_id)
            .await?
            .ok_or_else(|| JobError::BriefingNotFound(job.briefing_id.clone()))?;

        if let Some(budget_id) = briefing.generated_budget() {
            let budget_id = budget_id.to_string();
            if job.attempts <= 1 {
                tracing::info!(budget_id = %budget_id, "Briefing already has a budget");
                return Ok(Generated {
                    budget_id,
                    source: BudgetSource::Existing,
                    project_name: briefing.project_name,
                });
            }

            // An earlier attempt flagged the briefing, then stopped before closing.
            tracing::info!(budget_id = %budget_id, "Resuming budget flagged by an earlier attempt");
            deps.triggers
                .on_budget_generated(&budget_id, &job.briefing_id)
                .await?;
            return Ok(Generated {
                budget_id,
                source: BudgetSource::Resumed,
                project_name: briefing.project_name,
            });
        }

        // Covers a crash between creating the budget and flagging the briefing.
        if let Some(budget_id) = deps.budgets.find_generated_for_briefing(&job.briefing_id).await? {
            tracing::info!(budget_id = %budget_id, "Found budget generated by an earlier attempt");
            let project = match briefing.last_analysis.clone() {
                Some(project) => project,
                None => deps.analyzer.analyze(&briefing).await?,
            };
            deps.briefings
                .record_budget(&job.briefing_id, &budget_id, &project)
                .await?;
            deps.triggers
                .on_budget_generated(&budget_id, &job.briefing_id)
                .await?;
            return Ok(Generated {
                budget_id,
                source: BudgetSource::Resumed,
                project_name: briefing.project_name,
            });
        }

        if self.config.notify_processing {
            self.notify(NewNotification::budget_processing(&job.user_id, &job.briefing_id))
                .await;
        }

        let project = deps.analyzer.analyze(&briefing).await?;
        let office = deps.offices.office_config(&job.office_id).await?;
        let hours = deps.calculator.calculate_hours(&project, &office).await?;
        let values = deps.calculator.calculate_values(&project, &hours, &office).await?;
        tracing::debug!(
            total_hours = hours.total_hours,
            total_value = values.total_value,
            "Budget calculated"
        );

        let budget = NewBudget::assemble(job, &project, &office, hours, values);
        let budget_id = deps.budgets.create(budget).await?;
        deps.briefings
            .record_budget(&job.briefing_id, &budget_id, &project)
            .await?;
        deps.triggers
            .on_budget_generated(&budget_id, &job.briefing_id)
            .await?;

        Ok(Generated {
            budget_id,
            source: BudgetSource::Created,
            project_name: project.project_name,
        })
    }

    async fn finish_success(
        &self,
        job: &Job,
        generated: Generated,
        elapsed: Duration,
    ) -> Result<JobReport, DbError> {
        let elapsed_ms = elapsed.as_millis() as u64;
        if generated.announce() {
            self.notify(NewNotification::budget_generated(
                &job.user_id,
                &job.briefing_id,
                &generated.budget_id,
                &generated.project_name,
                self.config.budget_link(&generated.budget_id),
            ))
            .await;
        }
        let result = if generated.reused_existing() {
            JobResult::reused(generated.budget_id.clone(), elapsed_ms)
        } else {
            JobResult::new(generated.budget_id.clone(), elapsed_ms)
        };

        if !self.deps.jobs.complete(job.id, &result).await? {
            tracing::warn!("Job was no longer in progress when completing");
        }
        self.stats.send_modify(|s| s.record_success(elapsed));

        tracing::info!(
            budget_id = %generated.budget_id,
            reused_existing = generated.reused_existing(),
            source = ?generated.source,
            elapsed_ms,
            "Budget job completed"
        );

        Ok(JobReport::Completed {
            job_id: job.id,
            reused_existing: generated.reused_existing(),
            budget_id: generated.budget_id,
        })
    }

    async fn finish_failure(&self, job: &Job, err: JobError, elapsed: Duration) -> Result<JobReport, DbError> {
        let message = err.to_string();
        let retryable = err.is_retryable();
        tracing::warn!(error = %message, retryable, "Budget job failed");

        if let Err(e) = self
            .deps
            .triggers
            .on_budget_failed(&job.briefing_id, &message)
            .await
        {
            tracing::warn!(error = %e, "Failed to emit budget failed trigger");
        }
        self.stats.send_modify(|s| s.record_failure(elapsed));

        let outcome = self.deps.jobs.fail(job.id, &message, retryable).await?;
        match outcome {
            FailOutcome::Failed => {
                tracing::error!(attempts = job.attempts, error = %message, "Budget job failed permanently");
                self.notify(NewNotification::budget_failed(&job.user_id, &job.briefing_id, &message))
                    .await;
            }
            FailOutcome::Requeued => tracing::info!("Budget job re-queued for retry"),
            FailOutcome::NotInProgress => {
                tracing::warn!("Job was no longer in progress when recording failure")
            }
        }

        Ok(JobReport::Failed {
            job_id: job.id,
            error: message,
            outcome,
        })
    }

    /// Store a notification; a failure here never fails the job.
    async fn notify(&self, notification: NewNotification) {
        let kind = notification.kind;
        if let Err(e) = self.deps.notifications.create(notification).await {
            tracing::warn!(%kind, error = %e, "Failed to create notification");
        }
    }
}

/// Renew the job lease every `interval` until aborted or ownership is lost.
fn spawn_heartbeat(
    jobs: JobRepository,
    job_id: JobId,
    worker_id: String,
    lease: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            match jobs.renew_lease(job_id, &worker_id, lease).await {
                Ok(true) => tracing::trace!(%job_id, worker_id = %worker_id, "Lease renewed"),
                Ok(false) => {
                    tracing::warn!(%job_id, worker_id = %worker_id, "Lost ownership of job; stopping heartbeat");
                    break;
                }
                Err(e) => tracing::warn!(%job_id, worker_id = %worker_id, error = %e, "Lease renewal failed"),
            }
        }
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Actor wrapping a [`BudgetJobProcessor`].
pub struct BudgetWorker;

impl Actor for BudgetWorker {
    type Msg = BudgetWorkerMessage;
    type State = BudgetJobProcessor;
    type Arguments = BudgetJobProcessor;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        processor: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(worker_id = %processor.worker_id(), "Starting budget worker");
        Ok(processor)
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(BudgetWorkerMessage::Poll)?;
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BudgetWorkerMessage::Poll => match state.process_next().await {
                Ok(Some(_)) => {
                    myself.send_message(BudgetWorkerMessage::Poll)?;
                }
                Ok(None) => {
                    myself.send_after(state.config().idle_interval, || BudgetWorkerMessage::Poll);
                }
                Err(e) => {
                    tracing::error!(worker_id = %state.worker_id(), error = %e, "Budget worker loop error");
                    myself.send_after(state.config().error_backoff, || BudgetWorkerMessage::Poll);
                }
            },
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(worker_id = %state.worker_id(), "Budget worker stopped");
        Ok(())
    }
}
