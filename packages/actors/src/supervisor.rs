//! Supervisor actor managing the worker pool.
//!
//! The supervisor owns pool membership; every change goes through its
//! mailbox. Workers are linked children: a crashed worker is replaced with a
//! fresh one under the same id. [`WorkerPool`] is the cloneable handle the
//! rest of the process uses.

use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use pipeline_core::{FullPoolStats, PoolStats, WorkerStats};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::budget_worker::{BudgetJobProcessor, BudgetWorker};
use crate::config::{PoolConfig, StartOptions};
use crate::deps::PipelineDeps;
use crate::error::PoolError;
use crate::messages::{
    BudgetWorkerMessage, NotificationWorkerMessage, PoolReply, SupervisorMessage,
};
use crate::notification_worker::{NotificationDispatcher, NotificationWorker};

/// Id of the single notification worker.
pub const NOTIFICATION_WORKER_ID: &str = "notification-worker";

/// A running worker and the read side of its stats.
struct WorkerSlot<M: ractor::Message> {
    worker_id: String,
    actor: ActorRef<M>,
    stats: watch::Receiver<WorkerStats>,
}

impl<M: ractor::Message> WorkerSlot<M> {
    fn stats(&self) -> WorkerStats {
        self.stats.borrow().clone()
    }

    /// Stop after the in-flight message, killing the actor if `grace` runs out.
    async fn stop(self, grace: Duration) {
        let worker_id = self.worker_id;
        match self
            .actor
            .stop_and_wait(Some("worker pool stopping".to_string()), Some(grace))
            .await
        {
            Ok(()) => tracing::debug!(worker_id = %worker_id, "Worker stopped"),
            Err(_) => {
                tracing::warn!(worker_id = %worker_id, "Worker did not stop within grace period; killing");
                self.actor.kill();
            }
        }
    }
}

/// Arguments for the supervisor actor.
pub struct SupervisorArgs {
    pub deps: PipelineDeps,
    pub config: PoolConfig,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    deps: PipelineDeps,
    config: PoolConfig,
    running: bool,
    budget_workers: Vec<WorkerSlot<BudgetWorkerMessage>>,
    notification_worker: Option<WorkerSlot<NotificationWorkerMessage>>,
    /// Maintenance and cleanup tick tasks.
    tickers: Vec<JoinHandle<()>>,
    /// Worker counter for unique IDs.
    worker_counter: u64,
}

impl SupervisorState {
    fn new(args: SupervisorArgs) -> Self {
        Self {
            deps: args.deps,
            config: args.config,
            running: false,
            budget_workers: Vec::new(),
            notification_worker: None,
            tickers: Vec::new(),
            worker_counter: 0,
        }
    }

    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("budget-worker-{}", self.worker_counter)
    }

    fn pool_stats(&self, queue: pipeline_core::QueueCounts) -> PoolStats {
        PoolStats {
            running: self.running,
            budget_workers: self.budget_workers.iter().map(WorkerSlot::stats).collect(),
            notification_worker: self.notification_worker.as_ref().map(WorkerSlot::stats),
            queue,
        }
    }
}

async fn spawn_budget_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &SupervisorState,
    worker_id: String,
) -> Result<WorkerSlot<BudgetWorkerMessage>, PoolError> {
    let processor = BudgetJobProcessor::new(
        worker_id.clone(),
        state.deps.clone(),
        state.config.budget_worker.clone(),
    );
    let stats = processor.subscribe_stats();

    let (actor, _handle) = Actor::spawn_linked(None, BudgetWorker, processor, myself.get_cell())
        .await
        .map_err(|e| PoolError::Spawn(format!("{worker_id}: {e}")))?;

    Ok(WorkerSlot {
        worker_id,
        actor,
        stats,
    })
}

async fn spawn_notification_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &SupervisorState,
) -> Result<WorkerSlot<NotificationWorkerMessage>, PoolError> {
    let dispatcher = NotificationDispatcher::new(
        NOTIFICATION_WORKER_ID,
        state.deps.clone(),
        state.config.notification_worker.clone(),
    );
    let stats = dispatcher.subscribe_stats();

    let (actor, _handle) =
        Actor::spawn_linked(None, NotificationWorker, dispatcher, myself.get_cell())
            .await
            .map_err(|e| PoolError::Spawn(format!("{NOTIFICATION_WORKER_ID}: {e}")))?;

    Ok(WorkerSlot {
        worker_id: NOTIFICATION_WORKER_ID.to_string(),
        actor,
        stats,
    })
}

/// Send `message()` to the supervisor every `period` until it stops.
fn spawn_ticker(
    myself: ActorRef<SupervisorMessage>,
    period: Duration,
    message: fn() -> SupervisorMessage,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            interval.tick().await;
            if myself.send_message(message()).is_err() {
                break;
            }
        }
    })
}

async fn start_pool(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
    options: StartOptions,
) -> Result<(), PoolError> {
    if state.running {
        tracing::info!("Worker pool already running");
        return Ok(());
    }

    let count = if options.budget_worker_count == 0 {
        tracing::warn!("Requested zero budget workers; starting one");
        1
    } else {
        options.budget_worker_count
    };

    tracing::info!(
        budget_workers = count,
        notifications = options.enable_notifications,
        "Starting worker pool"
    );
    state.running = true;

    for _ in 0..count {
        let worker_id = state.next_worker_id();
        let slot = spawn_budget_worker(myself, state, worker_id).await?;
        state.budget_workers.push(slot);
    }

    if options.enable_notifications {
        state.notification_worker = Some(spawn_notification_worker(myself, state).await?);
    }

    state.tickers.push(spawn_ticker(
        myself.clone(),
        state.config.maintenance_interval,
        || SupervisorMessage::Maintenance,
    ));
    state.tickers.push(spawn_ticker(
        myself.clone(),
        state.config.cleanup_interval,
        || SupervisorMessage::Cleanup,
    ));

    Ok(())
}

async fn stop_pool(state: &mut SupervisorState) {
    if !state.running {
        tracing::info!("Worker pool not running");
        return;
    }

    tracing::info!("Stopping worker pool");
    state.running = false;
    for ticker in state.tickers.drain(..) {
        ticker.abort();
    }

    let grace = state.config.shutdown_grace;
    let budget_stops = state.budget_workers.drain(..).map(|slot| slot.stop(grace));
    let notification_stop = state.notification_worker.take().map(|slot| slot.stop(grace));
    futures_util::future::join(join_all(budget_stops), async {
        if let Some(stop) = notification_stop {
            stop.await;
        }
    })
    .await;

    tracing::info!("Worker pool stopped");
}

async fn restart_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
    worker_id: &str,
) -> Result<(), PoolError> {
    if !state.running {
        return Err(PoolError::NotRunning);
    }
    let grace = state.config.shutdown_grace;

    if let Some(pos) = state.budget_workers.iter().position(|s| s.worker_id == worker_id) {
        let fresh = spawn_budget_worker(myself, state, worker_id.to_string()).await?;
        let old = std::mem::replace(&mut state.budget_workers[pos], fresh);
        old.stop(grace).await;
    } else if state
        .notification_worker
        .as_ref()
        .is_some_and(|s| s.worker_id == worker_id)
    {
        let fresh = spawn_notification_worker(myself, state).await?;
        if let Some(old) = state.notification_worker.replace(fresh) {
            old.stop(grace).await;
        }
    } else {
        return Err(PoolError::UnknownWorker(worker_id.to_string()));
    }

    tracing::info!(worker_id, "Worker restarted");
    Ok(())
}

async fn add_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> Result<String, PoolError> {
    if !state.running {
        return Err(PoolError::NotRunning);
    }

    let worker_id = state.next_worker_id();
    let slot = spawn_budget_worker(myself, state, worker_id.clone()).await?;
    state.budget_workers.push(slot);

    tracing::info!(worker_id = %worker_id, total = state.budget_workers.len(), "Budget worker added");
    Ok(worker_id)
}

async fn remove_worker(state: &mut SupervisorState, worker_id: &str) -> Result<(), PoolError> {
    if !state.running {
        return Err(PoolError::NotRunning);
    }

    let pos = state
        .budget_workers
        .iter()
        .position(|s| s.worker_id == worker_id)
        .ok_or_else(|| PoolError::UnknownWorker(worker_id.to_string()))?;
    if state.budget_workers.len() <= 1 {
        return Err(PoolError::LastWorker);
    }

    let slot = state.budget_workers.remove(pos);
    slot.stop(state.config.shutdown_grace).await;

    tracing::info!(worker_id, total = state.budget_workers.len(), "Budget worker removed");
    Ok(())
}

/// Replace a tracked worker that died without being asked to.
async fn replace_dead_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
    actor_id: ActorId,
    cause: &str,
) {
    if let Some(pos) = state
        .budget_workers
        .iter()
        .position(|s| s.actor.get_id() == actor_id)
    {
        let worker_id = state.budget_workers[pos].worker_id.clone();
        tracing::error!(worker_id = %worker_id, cause, "Budget worker died; restarting");
        match spawn_budget_worker(myself, state, worker_id.clone()).await {
            Ok(slot) => state.budget_workers[pos] = slot,
            Err(e) => {
                tracing::error!(worker_id = %worker_id, error = %e, "Failed to restart budget worker");
                state.budget_workers.remove(pos);
            }
        }
    } else if state
        .notification_worker
        .as_ref()
        .is_some_and(|s| s.actor.get_id() == actor_id)
    {
        tracing::error!(worker_id = NOTIFICATION_WORKER_ID, cause, "Notification worker died; restarting");
        match spawn_notification_worker(myself, state).await {
            Ok(slot) => state.notification_worker = Some(slot),
            Err(e) => {
                tracing::error!(error = %e, "Failed to restart notification worker");
                state.notification_worker = None;
            }
        }
    }
}

/// Supervisor actor that manages all workers.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker pool supervisor");
        Ok(SupervisorState::new(args))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Start { options, reply } => {
                let result = start_pool(&myself, state, options).await;
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Failed to start worker pool");
                    stop_pool(state).await;
                }
                let _ = reply.send(result);
            }

            SupervisorMessage::Stop { reply } => {
                stop_pool(state).await;
                let _ = reply.send(Ok(()));
            }

            SupervisorMessage::GetStats { reply } => {
                let result = state
                    .deps
                    .jobs
                    .stats()
                    .await
                    .map(|queue| state.pool_stats(queue))
                    .map_err(PoolError::from);
                let _ = reply.send(result);
            }

            SupervisorMessage::GetFullStats { reply } => {
                let result = state
                    .deps
                    .jobs
                    .stats()
                    .await
                    .map(|queue| FullPoolStats::from_pool(state.pool_stats(queue), Utc::now()))
                    .map_err(PoolError::from);
                let _ = reply.send(result);
            }

            SupervisorMessage::RestartWorker { worker_id, reply } => {
                let _ = reply.send(restart_worker(&myself, state, &worker_id).await);
            }

            SupervisorMessage::AddWorker { reply } => {
                let _ = reply.send(add_worker(&myself, state).await);
            }

            SupervisorMessage::RemoveWorker { worker_id, reply } => {
                let _ = reply.send(remove_worker(state, &worker_id).await);
            }

            SupervisorMessage::RunCleanup { reply } => {
                let result = state
                    .deps
                    .jobs
                    .cleanup(state.config.job_retention)
                    .await
                    .map_err(PoolError::from);
                if let Ok(removed) = &result {
                    tracing::info!(removed, "Queue cleanup finished");
                }
                let _ = reply.send(result);
            }

            SupervisorMessage::Maintenance => {
                if state.running {
                    match state.deps.jobs.reap_expired_leases().await {
                        Ok(report) if report.requeued + report.failed > 0 => tracing::warn!(
                            requeued = report.requeued,
                            failed = report.failed,
                            "Reclaimed jobs with expired leases"
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Lease reaper failed"),
                    }
                }
            }

            SupervisorMessage::Cleanup => {
                if state.running {
                    match state.deps.jobs.cleanup(state.config.job_retention).await {
                        Ok(removed) => tracing::info!(removed, "Scheduled queue cleanup finished"),
                        Err(e) => tracing::error!(error = %e, "Scheduled queue cleanup failed"),
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, err) => {
                replace_dead_worker(&myself, state, cell.get_id(), &err.to_string()).await;
            }
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                // Workers only terminate when stopped by the pool, which untracks them first.
                let cause = reason.unwrap_or_else(|| "terminated".to_string());
                replace_dead_worker(&myself, state, cell.get_id(), &cause).await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        stop_pool(state).await;
        tracing::info!("Worker pool supervisor stopped");
        Ok(())
    }
}

/// Cloneable handle to a running supervisor.
#[derive(Clone)]
pub struct WorkerPool {
    supervisor: ActorRef<SupervisorMessage>,
}

impl WorkerPool {
    /// Spawn the supervisor. Workers start on [`WorkerPool::start`].
    pub async fn spawn(
        deps: PipelineDeps,
        config: PoolConfig,
    ) -> Result<(Self, JoinHandle<()>), PoolError> {
        let (supervisor, handle) = Actor::spawn(None, Supervisor, SupervisorArgs { deps, config })
            .await
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        Ok((Self { supervisor }, handle))
    }

    async fn call<T: Send + 'static>(
        &self,
        message: impl FnOnce(PoolReply<T>) -> SupervisorMessage,
    ) -> Result<T, PoolError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.supervisor
            .send_message(message(tx.into()))
            .map_err(|e| PoolError::Actor(e.to_string()))?;
        rx.await
            .map_err(|_| PoolError::Actor("supervisor dropped the reply".to_string()))?
    }

    /// Start the workers. A no-op when already running.
    pub async fn start(&self, options: StartOptions) -> Result<(), PoolError> {
        self.call(|reply| SupervisorMessage::Start { options, reply }).await
    }

    /// Stop every worker, waiting up to the grace period for in-flight work.
    /// A no-op when already stopped.
    pub async fn stop(&self) -> Result<(), PoolError> {
        self.call(|reply| SupervisorMessage::Stop { reply }).await
    }

    pub async fn stats(&self) -> Result<PoolStats, PoolError> {
        self.call(|reply| SupervisorMessage::GetStats { reply }).await
    }

    pub async fn full_stats(&self) -> Result<FullPoolStats, PoolError> {
        self.call(|reply| SupervisorMessage::GetFullStats { reply }).await
    }

    pub async fn restart_worker(&self, worker_id: &str) -> Result<(), PoolError> {
        let worker_id = worker_id.to_string();
        self.call(|reply| SupervisorMessage::RestartWorker { worker_id, reply })
            .await
    }

    /// Add a budget worker and return its id.
    pub async fn add_worker(&self) -> Result<String, PoolError> {
        self.call(|reply| SupervisorMessage::AddWorker { reply }).await
    }

    /// Remove a budget worker. The last one cannot be removed.
    pub async fn remove_worker(&self, worker_id: &str) -> Result<(), PoolError> {
        let worker_id = worker_id.to_string();
        self.call(|reply| SupervisorMessage::RemoveWorker { worker_id, reply })
            .await
    }

    /// Run the queue cleanup now. Returns how many jobs were removed.
    pub async fn run_cleanup(&self) -> Result<usize, PoolError> {
        self.call(|reply| SupervisorMessage::RunCleanup { reply }).await
    }

    /// Stop the workers, then the supervisor itself.
    pub async fn shutdown(self) -> Result<(), PoolError> {
        self.stop().await?;
        self.supervisor
            .stop_and_wait(Some("shutdown".to_string()), None)
            .await
            .map_err(|_| PoolError::Actor("supervisor did not stop cleanly".to_string()))
    }
}
